//! Stack trace → scopes → variables request chain.
//!
//! Each in-flight request is an entry keyed by its seq. The tree is complete
//! when the trace reply arrived and both fan-out maps are empty.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol;
use crate::stack::{Scope, StackFrame, Variable};

/// `scopes` request to issue for frame `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopesRequest {
    pub index: usize,
    pub frame_id: i64,
}

/// `variables` request to issue for scope `scope` of frame `frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VariablesRequest {
    pub frame: usize,
    pub scope: usize,
    pub reference: u32,
}

#[derive(Debug, Default)]
pub(crate) struct StackTraceChain {
    frames: Vec<StackFrame>,
    pending_trace: Option<u32>,
    pending_scopes: HashMap<u32, usize>,
    pending_variables: HashMap<u32, (usize, usize)>,
    armed: bool,
}

impl StackTraceChain {
    /// Drops the tree and every pending entry. Late replies become stale.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.pending_trace = None;
        self.pending_scopes.clear();
        self.pending_variables.clear();
        self.armed = false;
    }

    pub fn arm(&mut self, trace_seq: u32) {
        self.reset();
        self.pending_trace = Some(trace_seq);
        self.armed = true;
    }

    #[must_use]
    pub fn owns(&self, seq: u32) -> bool {
        self.pending_trace == Some(seq)
            || self.pending_scopes.contains_key(&seq)
            || self.pending_variables.contains_key(&seq)
    }

    #[must_use]
    pub fn is_trace(&self, seq: u32) -> bool {
        self.pending_trace == Some(seq)
    }

    #[must_use]
    pub fn is_scopes(&self, seq: u32) -> bool {
        self.pending_scopes.contains_key(&seq)
    }

    /// Builds frame placeholders from the trace reply and returns the
    /// `scopes` requests to fan out.
    pub fn accept_trace(
        &mut self,
        seq: u32,
        outcome: Result<Vec<protocol::StackFrame>, ProtocolError>,
    ) -> Vec<ScopesRequest> {
        if self.pending_trace != Some(seq) {
            debug!(seq, "unknown stackTrace request");
            return Vec::new();
        }
        self.pending_trace = None;
        let frames = match outcome {
            Ok(frames) => frames,
            Err(err) => {
                warn!(seq, "stack trace unavailable: {err}");
                self.armed = false;
                return Vec::new();
            }
        };
        if frames.is_empty() {
            warn!(seq, "stack trace has no frames");
        }
        self.frames = frames.iter().map(StackFrame::placeholder).collect();
        frames
            .iter()
            .enumerate()
            .map(|(index, frame)| ScopesRequest {
                index,
                frame_id: frame.id,
            })
            .collect()
    }

    pub fn expect_scopes(&mut self, seq: u32, index: usize) {
        self.pending_scopes.insert(seq, index);
    }

    /// Fills a frame's scopes and returns the `variables` requests to fan
    /// out. A failed reply retires its entry with no fan-out.
    pub fn accept_scopes(
        &mut self,
        seq: u32,
        outcome: Result<Vec<protocol::Scope>, ProtocolError>,
    ) -> Vec<VariablesRequest> {
        let Some(index) = self.pending_scopes.remove(&seq) else {
            debug!(seq, "unknown scopes request");
            return Vec::new();
        };
        let scopes = match outcome {
            Ok(scopes) => scopes,
            Err(err) => {
                warn!(seq, frame = index, "scopes unavailable: {err}");
                return Vec::new();
            }
        };
        let Some(frame) = self.frames.get_mut(index) else {
            return Vec::new();
        };
        frame.scopes = scopes.iter().map(Scope::placeholder).collect();
        scopes
            .iter()
            .enumerate()
            .map(|(scope, entry)| VariablesRequest {
                frame: index,
                scope,
                reference: entry.variables_reference,
            })
            .collect()
    }

    pub fn expect_variables(&mut self, seq: u32, frame: usize, scope: usize) {
        self.pending_variables.insert(seq, (frame, scope));
    }

    /// Fills a scope's variables. Returns `false` for an unknown seq.
    pub fn accept_variables(
        &mut self,
        seq: u32,
        outcome: Result<Vec<protocol::Variable>, ProtocolError>,
    ) -> bool {
        let Some((frame, scope)) = self.pending_variables.remove(&seq) else {
            debug!(seq, "unknown variables request");
            return false;
        };
        match outcome {
            Ok(variables) => {
                if let Some(entry) = self
                    .frames
                    .get_mut(frame)
                    .and_then(|frame| frame.scopes.get_mut(scope))
                {
                    entry.variables = variables.into_iter().map(Variable::from).collect();
                }
            }
            Err(err) => warn!(seq, frame, scope, "variables unavailable: {err}"),
        }
        true
    }

    /// Hands out the finished tree exactly once per armed chain.
    pub fn take_ready(&mut self) -> Option<Vec<StackFrame>> {
        let complete = self.armed
            && self.pending_trace.is_none()
            && self.pending_scopes.is_empty()
            && self.pending_variables.is_empty();
        if !complete {
            return None;
        }
        self.armed = false;
        Some(self.frames.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: i64) -> protocol::StackFrame {
        protocol::StackFrame {
            id,
            name: format!("f{id}"),
            instruction_pointer_reference: Some(format!("{:x}", 0x100 + id)),
        }
    }

    fn scope(name: &str, reference: u32) -> protocol::Scope {
        protocol::Scope {
            name: name.to_string(),
            presentation_hint: Some("locals".to_string()),
            variables_reference: reference,
            expensive: false,
        }
    }

    #[test]
    fn not_ready_until_trace_arrives() {
        let mut chain = StackTraceChain::default();
        chain.arm(1);
        assert!(chain.take_ready().is_none());
        assert!(chain.accept_trace(1, Ok(vec![])).is_empty());
        assert_eq!(chain.take_ready(), Some(vec![]));
        assert_eq!(chain.take_ready(), None);
    }

    #[test]
    fn out_of_order_fan_in_completes_once() {
        let mut chain = StackTraceChain::default();
        chain.arm(1);
        let requests = chain.accept_trace(1, Ok(vec![frame(0), frame(1)]));
        assert_eq!(requests.len(), 2);
        chain.expect_scopes(2, requests[0].index);
        chain.expect_scopes(3, requests[1].index);

        let vars = chain.accept_scopes(3, Ok(vec![scope("Locals", 10)]));
        chain.expect_variables(4, vars[0].frame, vars[0].scope);
        assert!(chain.take_ready().is_none());

        assert!(chain.accept_variables(4, Ok(vec![])));
        assert!(chain.take_ready().is_none());

        assert!(chain.accept_scopes(2, Ok(vec![])).is_empty());
        let frames = chain.take_ready().unwrap();
        assert_eq!(frames[0].scopes.len(), 0);
        assert_eq!(frames[1].scopes[0].name, "Locals");
        assert_eq!(frames[1].address, 0x101);
        assert!(chain.take_ready().is_none());
    }

    #[test]
    fn failed_scopes_reply_still_retires_entry() {
        let mut chain = StackTraceChain::default();
        chain.arm(1);
        chain.accept_trace(1, Ok(vec![frame(0)]));
        chain.expect_scopes(2, 0);
        let failure = ProtocolError::RequestFailed {
            command: "scopes".to_string(),
            message: "boom".to_string(),
        };
        assert!(chain.accept_scopes(2, Err(failure)).is_empty());
        assert_eq!(chain.take_ready().map(|frames| frames.len()), Some(1));
    }

    #[test]
    fn stale_replies_are_ignored_after_rearm() {
        let mut chain = StackTraceChain::default();
        chain.arm(1);
        chain.accept_trace(1, Ok(vec![frame(0)]));
        chain.expect_scopes(2, 0);
        chain.arm(5);
        assert!(!chain.owns(2));
        assert!(chain.accept_scopes(2, Ok(vec![scope("Locals", 1)])).is_empty());
        assert!(chain.take_ready().is_none());
    }
}
