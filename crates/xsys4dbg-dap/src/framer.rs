//! DAP message framing.
//! - MessageFramer: incremental Content-Length decoder fed in arbitrary chunks
//! - encode_message/write_message: emit framed payloads
//! - ProtocolLog: optional transcript of raw payloads

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::trace;

use crate::error::FramingError;

const CONTENT_LENGTH: &str = "Content-Length";

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Headers { content_length: Option<usize> },
    Content { length: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        Self::Headers {
            content_length: None,
        }
    }
}

/// Incremental decoder for `Content-Length` framed messages.
///
/// Bytes are appended with [`feed`](Self::feed) in whatever chunks the
/// transport delivers; [`next_message`](Self::next_message) yields complete
/// payloads and returns `Ok(None)` when more input is needed. After a framing
/// error the framer stays failed and keeps returning that error.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
    state: ReadState,
    failed: Option<FramingError>,
}

impl MessageFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed by a complete message.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_message(&mut self) -> Result<Option<String>, FramingError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        match self.advance() {
            Ok(message) => Ok(message),
            Err(err) => {
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<String>, FramingError> {
        loop {
            match self.state {
                ReadState::Headers { content_length } => {
                    let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') else {
                        if self.buffer.len() >= MAX_HEADER_LINE {
                            return Err(FramingError::HeaderTooLong {
                                limit: MAX_HEADER_LINE,
                            });
                        }
                        return Ok(None);
                    };
                    if end + 1 > MAX_HEADER_LINE {
                        return Err(FramingError::HeaderTooLong {
                            limit: MAX_HEADER_LINE,
                        });
                    }
                    let line: Vec<u8> = self.buffer.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&line);
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if trimmed.is_empty() {
                        let length = content_length.ok_or(FramingError::MissingContentLength)?;
                        self.state = ReadState::Content { length };
                        continue;
                    }
                    let length = parse_header(trimmed)?.or(content_length);
                    self.state = ReadState::Headers {
                        content_length: length,
                    };
                }
                ReadState::Content { length } => {
                    if self.buffer.len() < length {
                        return Ok(None);
                    }
                    let payload: Vec<u8> = self.buffer.drain(..length).collect();
                    self.state = ReadState::default();
                    let payload =
                        String::from_utf8(payload).map_err(|_| FramingError::InvalidUtf8)?;
                    return Ok(Some(payload));
                }
            }
        }
    }
}

/// Returns the content length if `line` is a `Content-Length` header.
fn parse_header(line: &str) -> Result<Option<usize>, FramingError> {
    let Some((name, value)) = line.split_once(':') else {
        trace!(header = line, "ignoring malformed header line");
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        trace!(header = name.trim(), "ignoring header");
        return Ok(None);
    }
    let value = value.trim();
    match value.parse::<i64>() {
        Ok(length) if length > 0 => usize::try_from(length)
            .map(Some)
            .map_err(|_| FramingError::InvalidContentLength(value.to_string())),
        _ => Err(FramingError::InvalidContentLength(value.to_string())),
    }
}

/// Frame `payload` for the wire.
#[must_use]
pub fn encode_message(payload: &str) -> Vec<u8> {
    let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", payload.len());
    let mut bytes = Vec::with_capacity(header.len() + payload.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

pub fn write_message<W: Write + ?Sized>(writer: &mut W, payload: &str) -> io::Result<()> {
    writer.write_all(&encode_message(payload))?;
    writer.flush()
}

/// Append-only transcript of the raw protocol traffic.
#[derive(Debug)]
pub struct ProtocolLog {
    writer: BufWriter<File>,
}

impl ProtocolLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, direction: &str, payload: &str) -> io::Result<()> {
        writeln!(self.writer, "{direction} {payload}")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str = r#"{"seq":1,"type":"event","event":"initialized"}"#;
    const SECOND: &str = r#"{"seq":2,"type":"event","event":"output","body":{"output":"héllo"}}"#;

    fn stream() -> Vec<u8> {
        let mut bytes = encode_message(FIRST);
        bytes.extend(encode_message(SECOND));
        bytes
    }

    fn drain(framer: &mut MessageFramer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(message) = framer.next_message().unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn decodes_whole_stream() {
        let mut framer = MessageFramer::new();
        framer.feed(&stream());
        assert_eq!(drain(&mut framer), vec![FIRST, SECOND]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn chunking_does_not_change_output() {
        let bytes = stream();
        for chunk_size in 1..=bytes.len() {
            let mut framer = MessageFramer::new();
            let mut out = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                framer.feed(chunk);
                out.extend(drain(&mut framer));
            }
            assert_eq!(out, vec![FIRST, SECOND], "chunk size {chunk_size}");
        }
    }

    #[test]
    fn partial_content_waits_for_more_input() {
        let bytes = encode_message(FIRST);
        let mut framer = MessageFramer::new();
        framer.feed(&bytes[..bytes.len() - 3]);
        assert_eq!(framer.next_message().unwrap(), None);
        framer.feed(&bytes[bytes.len() - 3..]);
        assert_eq!(framer.next_message().unwrap().as_deref(), Some(FIRST));
    }

    #[test]
    fn header_name_is_case_insensitive_and_extra_headers_ignored() {
        let payload = r#"{"a":1}"#;
        let raw = format!(
            "content-type: application/json\ncontent-length: {}\n\n{payload}",
            payload.len()
        );
        let mut framer = MessageFramer::new();
        framer.feed(raw.as_bytes());
        assert_eq!(framer.next_message().unwrap().as_deref(), Some(payload));
    }

    #[test]
    fn content_length_counts_utf8_bytes() {
        let encoded = encode_message(SECOND);
        let header = format!("Content-Length: {}\r\n\r\n", SECOND.len());
        assert!(encoded.starts_with(header.as_bytes()));
        assert_ne!(SECOND.len(), SECOND.chars().count());
    }

    #[test]
    fn missing_content_length_is_fatal() {
        let mut framer = MessageFramer::new();
        framer.feed(b"X-Other: 1\r\n\r\n{}");
        assert_eq!(
            framer.next_message(),
            Err(FramingError::MissingContentLength)
        );
        framer.feed(&encode_message(FIRST));
        assert_eq!(
            framer.next_message(),
            Err(FramingError::MissingContentLength)
        );
    }

    #[test]
    fn non_positive_content_length_is_rejected() {
        for value in ["0", "-4", "abc"] {
            let mut framer = MessageFramer::new();
            framer.feed(format!("Content-Length: {value}\r\n").as_bytes());
            assert_eq!(
                framer.next_message(),
                Err(FramingError::InvalidContentLength(value.to_string()))
            );
        }
    }

    #[test]
    fn overlong_header_line_is_rejected() {
        let mut framer = MessageFramer::new();
        framer.feed(&vec![b'x'; MAX_HEADER_LINE]);
        assert_eq!(
            framer.next_message(),
            Err(FramingError::HeaderTooLong {
                limit: MAX_HEADER_LINE
            })
        );
    }

    #[test]
    fn invalid_utf8_payload_is_rejected() {
        let mut framer = MessageFramer::new();
        framer.feed(b"Content-Length: 2\r\n\r\n\xff\xfe");
        assert_eq!(framer.next_message(), Err(FramingError::InvalidUtf8));
    }

    #[test]
    fn write_message_roundtrip() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, FIRST).unwrap();
        let mut framer = MessageFramer::new();
        framer.feed(&buffer);
        assert_eq!(framer.next_message().unwrap().as_deref(), Some(FIRST));
    }

    #[test]
    fn protocol_log_appends_directional_lines() {
        let path = std::env::temp_dir().join(format!("xsys4dbg-log-{}.txt", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut log = ProtocolLog::open(&path).unwrap();
        log.record("->", FIRST).unwrap();
        log.record("<-", r#"{"seq":3}"#).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(text, format!("-> {FIRST}\n<- {{\"seq\":3}}\n"));
    }
}
