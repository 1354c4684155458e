//! Render-state types for the interpreter's scene extension requests.
//! - geometry/color primitives accepting object or array encodings
//! - Parts tree with tagged state/operation/motion payloads
//! - Texture: base64 RGBA8888 pixel buffers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolError;

/// Extension command returning every scene entity.
pub const SCENE_COMMAND: &str = "_xsystem4.scene";
/// Extension command rendering a single scene entity to a texture.
pub const RENDER_ENTITY_COMMAND: &str = "_xsystem4.renderEntity";
/// Extension command rendering a parts object to a texture.
pub const RENDER_PARTS_COMMAND: &str = "_xsystem4.renderParts";
/// Extension command returning a sprite's texture.
pub const SPRITE_TEXTURE_COMMAND: &str = "_xsystem4.spriteTexture";

/// RGBA color. Invalid encodings decode to all `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "ColorRepr")]
pub struct Color {
    pub r: i32,
    pub g: i32,
    pub b: i32,
    pub a: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Object {
        #[serde(default)]
        r: i32,
        #[serde(default)]
        g: i32,
        #[serde(default)]
        b: i32,
        #[serde(default)]
        a: i32,
    },
    Array([i32; 4]),
    Other(Value),
}

impl From<ColorRepr> for Color {
    fn from(repr: ColorRepr) -> Self {
        match repr {
            ColorRepr::Object { r, g, b, a } => Self { r, g, b, a },
            ColorRepr::Array([r, g, b, a]) => Self { r, g, b, a },
            ColorRepr::Other(value) => {
                debug!(%value, "invalid Color object");
                Self {
                    r: -1,
                    g: -1,
                    b: -1,
                    a: -1,
                }
            }
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {} {})", self.r, self.g, self.b, self.a)
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RectangleRepr")]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RectangleRepr {
    Object {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        w: i32,
        #[serde(default)]
        h: i32,
    },
    Array([i32; 4]),
    Other(Value),
}

impl From<RectangleRepr> for Rectangle {
    fn from(repr: RectangleRepr) -> Self {
        match repr {
            RectangleRepr::Object { x, y, w, h } => Self { x, y, w, h },
            RectangleRepr::Array([x, y, w, h]) => Self { x, y, w, h },
            RectangleRepr::Other(value) => {
                debug!(%value, "invalid Rectangle object");
                Self {
                    x: -1,
                    y: -1,
                    w: -1,
                    h: -1,
                }
            }
        }
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {} {})", self.x, self.y, self.w, self.h)
    }
}

/// 2D point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "PointRepr")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Object {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
    },
    Array([i32; 2]),
    Other(Value),
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Object { x, y } | PointRepr::Array([x, y]) => Self { x, y },
            PointRepr::Other(value) => {
                debug!(%value, "invalid Point object");
                Self { x: -1, y: -1 }
            }
        }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.x, self.y)
    }
}

/// 3D point, used for rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Point3DRepr")]
pub struct Point3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Point3DRepr {
    Object {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        z: i32,
    },
    Array([i32; 3]),
    Other(Value),
}

impl From<Point3DRepr> for Point3D {
    fn from(repr: Point3DRepr) -> Self {
        match repr {
            Point3DRepr::Object { x, y, z } | Point3DRepr::Array([x, y, z]) => Self { x, y, z },
            Point3DRepr::Other(value) => {
                debug!(%value, "invalid Point3D object");
                Self {
                    x: -1,
                    y: -1,
                    z: -1,
                }
            }
        }
    }
}

/// Width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "SizeRepr")]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeRepr {
    Object {
        #[serde(default)]
        w: i32,
        #[serde(default)]
        h: i32,
    },
    Array([i32; 2]),
    Other(Value),
}

impl From<SizeRepr> for Size {
    fn from(repr: SizeRepr) -> Self {
        match repr {
            SizeRepr::Object { w, h } | SizeRepr::Array([w, h]) => Self { w, h },
            SizeRepr::Other(value) => {
                debug!(%value, "invalid Size object");
                Self { w: -1, h: -1 }
            }
        }
    }
}

/// Font and stroke settings for text parts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub face: u32,
    pub size: f32,
    pub bold_width: f32,
    pub weight: u32,
    pub edge_left: f32,
    pub edge_up: f32,
    pub edge_right: f32,
    pub edge_down: f32,
    pub color: Color,
    pub edge_color: Color,
    pub scale_x: f32,
    pub space_scale_x: f32,
    pub font_spacing: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsCg {
    pub no: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLine {
    pub contents: String,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsText {
    pub lines: Vec<TextLine>,
    pub line_space: i32,
    pub cursor: Point,
    pub text_style: TextStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsAnimation {
    pub start_no: i32,
    pub frame_time: i32,
    pub elapsed: i32,
    pub current_frame: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsNumeral {
    pub have_num: bool,
    pub num: i32,
    pub space: i32,
    pub show_comma: bool,
    pub length: i32,
    pub cg_no: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsConstructionProcess {
    pub operations: Vec<ConstructionOp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsFlash {
    pub filename: String,
    pub frame_count: i32,
    pub current_frame: i32,
}

/// One visual state (default, hovered, clicked) of a parts object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartsState {
    Uninitialized,
    Cg(PartsCg),
    Text(PartsText),
    Animation(PartsAnimation),
    Numeral(PartsNumeral),
    #[serde(rename = "hgauge")]
    HGauge,
    #[serde(rename = "vgauge")]
    VGauge,
    ConstructionProcess(PartsConstructionProcess),
    Flash(PartsFlash),
    #[default]
    #[serde(other)]
    Invalid,
}

impl PartsState {
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Cg(cg) => format!("CG {}", cg.no),
            Self::Text(_) => "Text".to_string(),
            Self::Animation(_) => "Animation".to_string(),
            Self::Numeral(num) if num.have_num => format!("Numeral {}", num.num),
            Self::Numeral(_) => "Numeral (uninitialized)".to_string(),
            Self::HGauge => "HGauge".to_string(),
            Self::VGauge => "VGauge".to_string(),
            Self::ConstructionProcess(_) => "Construction Process".to_string(),
            Self::Flash(flash) => format!("Flash {}", flash.filename),
            Self::Uninitialized => "Uninitialized".to_string(),
            Self::Invalid => "<invalid>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpCreate {
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpFill {
    pub rect: Rectangle,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpCutCg {
    pub cg_no: i32,
    pub dst: Rectangle,
    pub src: Rectangle,
    pub interp_type: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpText {
    pub text: String,
    pub pos: Point,
    pub line_space: i32,
    pub style: TextStyle,
}

/// A single step of a construction-process parts object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstructionOp {
    Create(CpCreate),
    CreatePixelOnly(CpCreate),
    Cg(PartsCg),
    Fill(CpFill),
    FillAlphaColor(CpFill),
    FillAmap(CpFill),
    DrawCutCg(CpCutCg),
    CopyCutCg(CpCutCg),
    DrawText(CpText),
    CopyText(CpText),
    #[default]
    #[serde(other)]
    Invalid,
}

/// Property animated by a parts motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    Pos,
    VibrationSize,
    Alpha,
    Cg,
    NumeralNumber,
    HgaugeRate,
    VgaugeRate,
    MagX,
    MagY,
    RotateX,
    RotateY,
    RotateZ,
    Invalid,
}

impl MotionKind {
    fn parse(name: &str) -> Self {
        match name {
            "pos" => Self::Pos,
            "vibration_size" => Self::VibrationSize,
            "alpha" => Self::Alpha,
            "cg" => Self::Cg,
            "numeral_number" => Self::NumeralNumber,
            "hgauge_rate" => Self::HgaugeRate,
            "vgauge_rate" => Self::VgaugeRate,
            "mag_x" => Self::MagX,
            "mag_y" => Self::MagY,
            "rotate_x" => Self::RotateX,
            "rotate_y" => Self::RotateY,
            "rotate_z" => Self::RotateZ,
            _ => Self::Invalid,
        }
    }
}

/// Endpoint value of a motion; its shape depends on the [`MotionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MotionValue {
    Pos(Point),
    Size(Size),
    Int(i64),
    Float(f64),
    None,
}

impl MotionValue {
    fn decode(kind: MotionKind, value: Value) -> Self {
        match kind {
            MotionKind::Pos => Self::Pos(serde_json::from_value(value).unwrap_or_default()),
            MotionKind::VibrationSize => {
                Self::Size(serde_json::from_value(value).unwrap_or_default())
            }
            MotionKind::Alpha | MotionKind::Cg | MotionKind::NumeralNumber => {
                Self::Int(value.as_i64().unwrap_or_default())
            }
            MotionKind::HgaugeRate
            | MotionKind::VgaugeRate
            | MotionKind::MagX
            | MotionKind::MagY
            | MotionKind::RotateX
            | MotionKind::RotateY
            | MotionKind::RotateZ => Self::Float(value.as_f64().unwrap_or_default()),
            MotionKind::Invalid => Self::None,
        }
    }
}

/// Scheduled animation of one parts property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMotion")]
pub struct PartsMotion {
    pub kind: MotionKind,
    pub begin: MotionValue,
    pub end: MotionValue,
    pub begin_time: i32,
    pub end_time: i32,
}

#[derive(Deserialize)]
struct RawMotion {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    begin: Value,
    #[serde(default)]
    end: Value,
    #[serde(rename = "beginTime", default)]
    begin_time: i32,
    #[serde(rename = "endTime", default)]
    end_time: i32,
}

impl From<RawMotion> for PartsMotion {
    fn from(raw: RawMotion) -> Self {
        let kind = MotionKind::parse(&raw.kind);
        Self {
            kind,
            begin: MotionValue::decode(kind, raw.begin),
            end: MotionValue::decode(kind, raw.end),
            begin_time: raw.begin_time,
            end_time: raw.end_time,
        }
    }
}

/// Placement parameters of a parts object, local or composed with parents.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartsParams {
    pub z: i32,
    pub pos: Point,
    pub show: bool,
    pub alpha: i32,
    pub scale: Point,
    pub rotation: Point3D,
    pub add_color: Color,
    pub mul_color: Color,
}

/// PartsEngine object with its children.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Parts {
    pub no: i32,
    pub state: String,
    #[serde(rename = "default")]
    pub default_state: PartsState,
    pub hovered: PartsState,
    pub clicked: PartsState,
    pub local: PartsParams,
    pub global: PartsParams,
    pub delegate_index: i32,
    pub sprite_deform: i32,
    pub clickable: bool,
    pub on_cursor_sound: i32,
    pub on_click_sound: i32,
    pub origin_mode: i32,
    pub linked_to: i32,
    pub linked_from: i32,
    pub draw_filter: i32,
    pub message_window: bool,
    pub motions: Vec<PartsMotion>,
    pub children: Vec<Parts>,
}

impl Parts {
    /// State currently shown, selected by the `state` field.
    #[must_use]
    pub fn active_state(&self) -> &PartsState {
        match self.state.as_str() {
            "hovered" => &self.hovered,
            "clicked" => &self.clicked,
            _ => &self.default_state,
        }
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.active_state().description()
    }

    /// Depth-first search for the parts object numbered `no`.
    #[must_use]
    pub fn find(&self, no: i32) -> Option<&Parts> {
        if self.no == no {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(no))
    }
}

/// SACT2-style sprite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sprite {
    pub no: i32,
    pub color: Color,
    pub multiply_color: Color,
    pub add_color: Color,
    pub blend_rate: i32,
    pub draw_method: String,
    pub rect: Rectangle,
    pub cg_no: i32,
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            no: -1,
            color: Color::default(),
            multiply_color: Color::default(),
            add_color: Color::default(),
            blend_rate: 0,
            draw_method: String::new(),
            rect: Rectangle::default(),
            cg_no: 0,
        }
    }
}

/// One drawable entity of the interpreter's scene graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneEntity {
    pub id: i32,
    pub z: i32,
    pub z2: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sprite: Option<Sprite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Parts>>,
}

impl Default for SceneEntity {
    fn default() -> Self {
        Self {
            id: -1,
            z: 0,
            z2: 0,
            sprite: None,
            parts: None,
        }
    }
}

impl SceneEntity {
    #[must_use]
    pub fn name(&self) -> String {
        if self.parts.is_some() {
            return "PartsEngine".to_string();
        }
        match &self.sprite {
            Some(sprite) => format!("sprite {}", sprite.no),
            None => "<anonymous entity>".to_string(),
        }
    }
}

/// Response body for [`SCENE_COMMAND`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneResponseBody {
    pub entities: Vec<SceneEntity>,
}

/// Decoded RGBA8888 image.
#[derive(Clone, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TextureBody {
    width: u32,
    height: u32,
    pixels: String,
}

impl Texture {
    /// Decode a texture response body. Trailing pixel bytes are discarded.
    pub fn decode(body: Value) -> Result<Self, ProtocolError> {
        let body: TextureBody = serde_json::from_value(body)
            .map_err(|err| ProtocolError::InvalidTexture(err.to_string()))?;
        let mut pixels = STANDARD
            .decode(body.pixels.as_bytes())
            .map_err(|err| ProtocolError::InvalidTexture(err.to_string()))?;
        let expected = (body.width as usize)
            .checked_mul(body.height as usize)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| ProtocolError::InvalidTexture("dimensions overflow".to_string()))?;
        if pixels.len() < expected {
            return Err(ProtocolError::InvalidTexture(format!(
                "pixel data truncated ({} of {expected} bytes)",
                pixels.len()
            )));
        }
        pixels.truncate(expected);
        Ok(Self {
            width: body.width,
            height: body.height,
            pixels,
        })
    }
}

/// What a texture request rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    Entity(i32),
    Parts(i32),
    Sprite(i32),
}

impl RenderTarget {
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Entity(_) => RENDER_ENTITY_COMMAND,
            Self::Parts(_) => RENDER_PARTS_COMMAND,
            Self::Sprite(_) => SPRITE_TEXTURE_COMMAND,
        }
    }

    #[must_use]
    pub fn arguments(self) -> Value {
        match self {
            Self::Entity(id) => serde_json::json!({ "id": id }),
            Self::Parts(no) | Self::Sprite(no) => serde_json::json!({ "no": no }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn primitives_accept_object_and_array_forms() {
        let a: Color = serde_json::from_value(json!({"r": 1, "g": 2, "b": 3, "a": 4})).unwrap();
        let b: Color = serde_json::from_value(json!([1, 2, 3, 4])).unwrap();
        assert_eq!(a, b);
        let rect: Rectangle = serde_json::from_value(json!([0, 0, 640, 480])).unwrap();
        assert_eq!(rect.to_string(), "(0 0 640 480)");
        let bad: Point = serde_json::from_value(json!("nope")).unwrap();
        assert_eq!(bad, Point { x: -1, y: -1 });
    }

    #[test]
    fn sprite_entity_is_named_after_sprite() {
        let entity: SceneEntity = serde_json::from_value(json!({
            "id": 3,
            "z": 10,
            "sprite": {"no": 42, "color": [255, 255, 255, 255], "draw_method": "normal"}
        }))
        .unwrap();
        assert_eq!(entity.name(), "sprite 42");
        let sprite = entity.sprite.unwrap();
        assert_eq!(sprite.color.to_string(), "(255 255 255 255)");
        assert_eq!(sprite.draw_method, "normal");
    }

    #[test]
    fn parts_states_decode_by_tag() {
        let entity: SceneEntity = serde_json::from_value(json!({
            "id": 1,
            "parts": [{
                "no": 7,
                "state": "hovered",
                "default": {"type": "cg", "no": 12},
                "hovered": {"type": "numeral", "have_num": true, "num": 99},
                "clicked": {"type": "something_new"},
                "motions": [
                    {"type": "pos", "begin": {"x": 0, "y": 0}, "end": {"x": 5, "y": 6},
                     "beginTime": 0, "endTime": 100},
                    {"type": "mag_x", "begin": 1.0, "end": 2.5}
                ],
                "children": [{
                    "no": 8,
                    "default": {"type": "construction_process", "operations": [
                        {"type": "fill", "rect": [0, 0, 4, 4], "color": [1, 2, 3, 4]},
                        {"type": "draw_text", "text": "hi", "pos": {"x": 1, "y": 2}}
                    ]}
                }]
            }]
        }))
        .unwrap();
        assert_eq!(entity.name(), "PartsEngine");
        let parts = &entity.parts.as_ref().unwrap()[0];
        assert_eq!(parts.description(), "Numeral 99");
        assert_eq!(parts.default_state.description(), "CG 12");
        assert_eq!(parts.clicked, PartsState::Invalid);
        assert_eq!(parts.motions[0].end, MotionValue::Pos(Point { x: 5, y: 6 }));
        assert_eq!(parts.motions[0].end_time, 100);
        assert_eq!(parts.motions[1].kind, MotionKind::MagX);
        assert_eq!(parts.motions[1].end, MotionValue::Float(2.5));

        let child = parts.find(8).unwrap();
        let PartsState::ConstructionProcess(cproc) = &child.default_state else {
            panic!("expected construction process, got {:?}", child.default_state);
        };
        assert_eq!(cproc.operations.len(), 2);
        assert!(matches!(&cproc.operations[1], ConstructionOp::DrawText(text) if text.text == "hi"));
    }

    #[test]
    fn texture_requires_full_pixel_buffer() {
        let pixels = STANDARD.encode([1u8, 2, 3, 4, 5, 6, 7, 8, 9]);
        let texture =
            Texture::decode(json!({"width": 2, "height": 1, "pixels": pixels})).unwrap();
        assert_eq!(texture.pixels, vec![1, 2, 3, 4, 5, 6, 7, 8]);

        let short = STANDARD.encode([0u8; 4]);
        let err = Texture::decode(json!({"width": 2, "height": 2, "pixels": short})).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidTexture(_)));
    }
}
