#![allow(dead_code)]

use crossbeam_channel::{unbounded, Receiver};
use serde_json::Value;
use xsys4dbg_dap::testing::AdapterProbe;
use xsys4dbg_dap::{DebugSession, DebuggerConfig, SessionEvent};

pub struct Harness {
    pub session: DebugSession,
    pub probe: AdapterProbe,
    pub events: Receiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DebuggerConfig::default())
    }

    pub fn with_config(config: DebuggerConfig) -> Self {
        let probe = AdapterProbe::new();
        let (tx, events) = unbounded();
        let session = DebugSession::new(config, Box::new(probe.launcher()), tx);
        Self {
            session,
            probe,
            events,
        }
    }

    /// Points the session at this crate's directory, spawning the adapter.
    pub fn open(&mut self) {
        self.session
            .set_game_dir(env!("CARGO_MANIFEST_DIR"))
            .expect("game dir");
    }

    pub fn feed(&mut self, bytes: Vec<u8>) {
        self.session.handle_bytes(&bytes);
    }

    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.events.try_iter().collect()
    }

    /// Seq of the most recent request named `command`.
    pub fn last_seq(&self, command: &str) -> u32 {
        self.probe
            .requests()
            .iter()
            .rev()
            .find(|request| request["command"] == command)
            .and_then(|request| request["seq"].as_u64())
            .map(|seq| seq as u32)
            .unwrap_or_else(|| panic!("no {command} request sent"))
    }
}

/// One line per request: seq, command and compact arguments.
pub fn wire_summary(requests: &[Value]) -> String {
    let mut out = String::new();
    for request in requests {
        let arguments = match &request["arguments"] {
            Value::Null => "-".to_string(),
            other => other.to_string(),
        };
        out.push_str(&format!(
            "{} {} {}\n",
            request["seq"],
            request["command"].as_str().unwrap_or("?"),
            arguments
        ));
    }
    out
}
