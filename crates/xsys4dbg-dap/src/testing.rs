//! In-memory adapter for driving a [`DebugSession`](crate::DebugSession)
//! without an interpreter.
//! - AdapterProbe: inspects what the session wrote and how it managed processes
//! - RecordingLauncher: `AdapterLauncher` whose connections write into the probe
//! - frame_event/frame_response/frame_failure: scripted adapter output

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::DebuggerConfig;
use crate::error::ProcessError;
use crate::framer::{encode_message, MessageFramer};
use crate::process::{AdapterConnection, AdapterLauncher};

/// One recorded `spawn` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRecord {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct ProbeState {
    written: Vec<u8>,
    consumed: usize,
    spawns: Vec<SpawnRecord>,
    running: bool,
    shutdowns: usize,
    kills: usize,
    fail_next_spawn: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdapterProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl AdapterProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn launcher(&self) -> RecordingLauncher {
        RecordingLauncher {
            state: Arc::clone(&self.state),
        }
    }

    /// Requests written since the last call, decoded.
    #[must_use]
    pub fn take_requests(&self) -> Vec<Value> {
        let mut state = self.lock();
        let fresh = state.written[state.consumed..].to_vec();
        state.consumed = state.written.len();
        decode_all(&fresh)
    }

    /// Every request written so far, decoded.
    #[must_use]
    pub fn requests(&self) -> Vec<Value> {
        decode_all(&self.lock().written)
    }

    #[must_use]
    pub fn spawns(&self) -> Vec<SpawnRecord> {
        self.lock().spawns.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }

    #[must_use]
    pub fn kills(&self) -> usize {
        self.lock().kills
    }

    /// Makes the next spawn fail with `reason`.
    pub fn fail_next_spawn(&self, reason: impl Into<String>) {
        self.lock().fail_next_spawn = Some(reason.into());
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode_all(bytes: &[u8]) -> Vec<Value> {
    let mut framer = MessageFramer::new();
    framer.feed(bytes);
    let mut out = Vec::new();
    while let Ok(Some(payload)) = framer.next_message() {
        if let Ok(value) = serde_json::from_str(&payload) {
            out.push(value);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct RecordingLauncher {
    state: Arc<Mutex<ProbeState>>,
}

impl AdapterLauncher for RecordingLauncher {
    fn spawn(
        &mut self,
        config: &DebuggerConfig,
        working_dir: &Path,
        generation: u64,
    ) -> Result<Box<dyn AdapterConnection>, ProcessError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reason) = state.fail_next_spawn.take() {
            return Err(ProcessError::Spawn {
                program: config.interpreter.display().to_string(),
                reason,
            });
        }
        state.spawns.push(SpawnRecord {
            program: config.interpreter.clone(),
            args: config.interpreter_args(),
            working_dir: working_dir.to_path_buf(),
            generation,
        });
        state.running = true;
        Ok(Box::new(RecordingConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct RecordingConnection {
    state: Arc<Mutex<ProbeState>>,
}

impl RecordingConnection {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for RecordingConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.running {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AdapterConnection for RecordingConnection {
    fn is_running(&mut self) -> bool {
        self.lock().running
    }

    fn shutdown(&mut self, _timeout: Duration) {
        let mut state = self.lock();
        state.shutdowns += 1;
        state.running = false;
    }

    fn kill(&mut self) {
        let mut state = self.lock();
        state.kills += 1;
        state.running = false;
    }
}

/// Framed adapter event.
#[must_use]
pub fn frame_event(event: &str, body: Option<Value>) -> Vec<u8> {
    let mut message = json!({"seq": 0, "type": "event", "event": event});
    if let Some(body) = body {
        message["body"] = body;
    }
    encode_message(&message.to_string())
}

/// Framed successful response to `request_seq`.
#[must_use]
pub fn frame_response(request_seq: u32, command: &str, body: Option<Value>) -> Vec<u8> {
    let mut message = json!({
        "seq": 0,
        "type": "response",
        "request_seq": request_seq,
        "success": true,
        "command": command,
    });
    if let Some(body) = body {
        message["body"] = body;
    }
    encode_message(&message.to_string())
}

/// Framed failed response to `request_seq`.
#[must_use]
pub fn frame_failure(request_seq: u32, command: &str, error: &str) -> Vec<u8> {
    let message = json!({
        "seq": 0,
        "type": "response",
        "request_seq": request_seq,
        "success": false,
        "command": command,
        "message": error,
    });
    encode_message(&message.to_string())
}
