//! DAP protocol client.
//! - DapClient: owns the adapter connection, assigns request seqs, frames traffic
//! - decode_message: classifies incoming payloads into events and replies
//! - Incoming/DapEvent/Reply/ReplyBody: decoded traffic handed to the session

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DebuggerConfig;
use crate::error::{DebugResult, FramingError, ProcessError, ProtocolError};
use crate::framer::{write_message, MessageFramer, ProtocolLog};
use crate::process::{AdapterConnection, AdapterLauncher};
use crate::protocol::{
    parse_address, Event, InitializeArguments, MessageType, OutputEventBody, Request, Response,
    Scope, ScopesResponseBody, SetInstructionBreakpointsResponseBody, StackFrame,
    StackTraceResponseBody, StoppedEventBody, Variable, VariablesResponseBody,
};
use crate::scene::{
    SceneEntity, SceneResponseBody, Texture, RENDER_ENTITY_COMMAND, RENDER_PARTS_COMMAND,
    SCENE_COMMAND, SPRITE_TEXTURE_COMMAND,
};

/// Event received from the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DapEvent {
    Output {
        category: Option<String>,
        output: String,
    },
    Initialized,
    Stopped {
        reason: String,
    },
    Terminated,
}

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Launched,
    Continued,
    StackTrace(Vec<StackFrame>),
    Scopes(Vec<Scope>),
    Variables(Vec<Variable>),
    /// Verified breakpoint addresses.
    Breakpoints(Vec<u32>),
    Scene(Vec<SceneEntity>),
    Texture(Texture),
    Ack,
}

/// Response to a request, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request_seq: u32,
    pub command: String,
    pub outcome: Result<ReplyBody, ProtocolError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Event(DapEvent),
    Response(Reply),
}

/// Request side of the protocol. Sending never waits for the reply; the
/// returned seq is the correlation key.
pub struct DapClient {
    launcher: Box<dyn AdapterLauncher>,
    connection: Option<Box<dyn AdapterConnection>>,
    framer: MessageFramer,
    next_seq: u32,
    generation: u64,
    transcript: Option<ProtocolLog>,
}

impl DapClient {
    #[must_use]
    pub fn new(launcher: Box<dyn AdapterLauncher>) -> Self {
        Self {
            launcher,
            connection: None,
            framer: MessageFramer::new(),
            next_seq: 1,
            generation: 0,
            transcript: None,
        }
    }

    pub fn set_transcript(&mut self, transcript: Option<ProtocolLog>) {
        self.transcript = transcript;
    }

    /// Generation of the current (or most recent) adapter process.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Spawns a fresh adapter and sends `initialize`. Any previous process
    /// is killed first.
    pub fn start(&mut self, config: &DebuggerConfig, game_dir: &Path) -> DebugResult<u32> {
        self.teardown();
        let connection = self.launcher.spawn(config, game_dir, self.generation)?;
        self.connection = Some(connection);
        self.send(
            "initialize",
            Some(InitializeArguments {
                adapter_id: config.adapter_id.clone(),
            }),
        )
    }

    pub fn send<T: Serialize>(&mut self, command: &str, arguments: Option<T>) -> DebugResult<u32> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(ProcessError::NotRunning.into());
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = Request {
            seq,
            message_type: MessageType::Request,
            command: command.to_string(),
            arguments,
        };
        let payload = serde_json::to_string(&request)
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;
        write_message(connection.as_mut(), &payload)
            .map_err(|err| ProcessError::Io(err.to_string()))?;
        debug!(seq, command, "sent request");
        if let Some(transcript) = self.transcript.as_mut() {
            if let Err(err) = transcript.record("->", &payload) {
                warn!("failed to write protocol log: {err}");
            }
        }
        Ok(seq)
    }

    /// Sends `disconnect`; the adapter is expected to exit on its own.
    pub fn terminate(&mut self) -> DebugResult<u32> {
        self.send::<Value>("disconnect", None)
    }

    /// Feeds adapter output and returns every message it completed.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Incoming>, FramingError> {
        self.framer.feed(bytes);
        let mut incoming = Vec::new();
        while let Some(payload) = self.framer.next_message()? {
            if let Some(transcript) = self.transcript.as_mut() {
                if let Err(err) = transcript.record("<-", &payload) {
                    warn!("failed to write protocol log: {err}");
                }
            }
            match decode_message(&payload) {
                Ok(Some(message)) => incoming.push(message),
                Ok(None) => {}
                Err(err) => warn!("dropping adapter message: {err}"),
            }
        }
        Ok(incoming)
    }

    /// Waits for the adapter to exit after `disconnect`, killing it on timeout.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Some(mut connection) = self.connection.take() {
            connection.shutdown(timeout);
        }
        self.reset();
    }

    /// Kills the adapter, if any, and invalidates its pending notices.
    pub fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.kill();
        }
        self.reset();
    }

    /// Releases a connection whose process already exited.
    pub fn detach(&mut self) {
        self.connection = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.framer = MessageFramer::new();
        self.generation += 1;
    }
}

/// Classifies one payload. `Ok(None)` means the message was ignored.
pub fn decode_message(payload: &str) -> Result<Option<Incoming>, ProtocolError> {
    let value: Value =
        serde_json::from_str(payload).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let message_type = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    match message_type.as_deref() {
        Some("event") => decode_event(value),
        Some("response") => decode_response(value).map(|reply| Some(Incoming::Response(reply))),
        other => {
            debug!(message_type = ?other, "ignoring message");
            Ok(None)
        }
    }
}

fn decode_event(value: Value) -> Result<Option<Incoming>, ProtocolError> {
    let event: Event<Value> =
        serde_json::from_value(value).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let name = event.event.as_str();
    let decoded = match name {
        "output" => {
            let body: OutputEventBody = decode_body(name, event.body)?;
            DapEvent::Output {
                category: body.category,
                output: body.output,
            }
        }
        "initialized" => DapEvent::Initialized,
        "stopped" => {
            let body: StoppedEventBody = decode_body(name, event.body)?;
            DapEvent::Stopped {
                reason: body.reason,
            }
        }
        "terminated" => DapEvent::Terminated,
        _ => {
            debug!(event = name, "unhandled event");
            return Ok(None);
        }
    };
    Ok(Some(Incoming::Event(decoded)))
}

fn decode_response(value: Value) -> Result<Reply, ProtocolError> {
    let response: Response<Value> =
        serde_json::from_value(value).map_err(|err| ProtocolError::Malformed(err.to_string()))?;
    let command = response.command;
    let outcome = if response.success {
        decode_reply_body(&command, response.body)
    } else {
        let message = response
            .message
            .unwrap_or_else(|| "unknown error".to_string());
        warn!(
            seq = response.request_seq,
            command = command.as_str(),
            "request failed: {message}"
        );
        Err(ProtocolError::RequestFailed {
            command: command.clone(),
            message,
        })
    };
    Ok(Reply {
        request_seq: response.request_seq,
        command,
        outcome,
    })
}

fn decode_reply_body(command: &str, body: Option<Value>) -> Result<ReplyBody, ProtocolError> {
    let decoded = match command {
        "launch" => ReplyBody::Launched,
        "continue" => ReplyBody::Continued,
        "stackTrace" => {
            let body: StackTraceResponseBody = decode_body(command, body)?;
            ReplyBody::StackTrace(body.stack_frames)
        }
        "scopes" => {
            let body: ScopesResponseBody = decode_body(command, body)?;
            ReplyBody::Scopes(body.scopes)
        }
        "variables" => {
            let body: VariablesResponseBody = decode_body(command, body)?;
            ReplyBody::Variables(body.variables)
        }
        "setInstructionBreakpoints" => {
            let body: SetInstructionBreakpointsResponseBody = decode_body(command, body)?;
            ReplyBody::Breakpoints(verified_addresses(body))
        }
        SCENE_COMMAND => {
            let body: SceneResponseBody = decode_body(command, body)?;
            ReplyBody::Scene(body.entities)
        }
        RENDER_ENTITY_COMMAND | RENDER_PARTS_COMMAND | SPRITE_TEXTURE_COMMAND => {
            let body = body.ok_or_else(|| ProtocolError::InvalidTexture("missing body".into()))?;
            ReplyBody::Texture(Texture::decode(body)?)
        }
        _ => ReplyBody::Ack,
    };
    Ok(decoded)
}

/// Deserializes an optional body; a missing body reads as `{}`.
fn decode_body<T: DeserializeOwned>(
    command: &str,
    body: Option<Value>,
) -> Result<T, ProtocolError> {
    let body = body.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(body).map_err(|err| ProtocolError::InvalidBody {
        command: command.to_string(),
        reason: err.to_string(),
    })
}

fn verified_addresses(body: SetInstructionBreakpointsResponseBody) -> Vec<u32> {
    body.breakpoints
        .into_iter()
        .filter_map(|breakpoint| {
            let reference = breakpoint.instruction_reference.as_deref();
            if !breakpoint.verified {
                debug!(
                    reference,
                    message = breakpoint.message.as_deref(),
                    "unverified breakpoint"
                );
                return None;
            }
            let address = reference.and_then(parse_address);
            if address.is_none() {
                debug!(reference, "verified breakpoint without a usable address");
            }
            address
        })
        .collect()
}
