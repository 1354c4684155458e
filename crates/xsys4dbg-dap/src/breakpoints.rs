//! Instruction breakpoint bookkeeping.
//!
//! The interpreter is authoritative: every mutation sends the whole requested
//! set, and the acknowledged reply replaces local state with whatever the
//! interpreter verified.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

/// Result of applying a `setInstructionBreakpoints` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointUpdate {
    /// The reply was for a request this registry did not send.
    Unknown,
    /// Confirmed set after the reply.
    Applied(BTreeSet<u32>),
}

#[derive(Debug, Default, Clone)]
pub struct BreakpointRegistry {
    requested: BTreeSet<u32>,
    confirmed: BTreeSet<u32>,
    in_flight: HashSet<u32>,
}

impl BreakpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the interpreter confirmed a breakpoint at `address`.
    #[must_use]
    pub fn is_breakpoint(&self, address: u32) -> bool {
        self.confirmed.contains(&address)
    }

    /// Whether `address` is part of the locally requested set.
    #[must_use]
    pub fn is_requested(&self, address: u32) -> bool {
        self.requested.contains(&address)
    }

    #[must_use]
    pub fn confirmed(&self) -> &BTreeSet<u32> {
        &self.confirmed
    }

    #[must_use]
    pub fn requested(&self) -> &BTreeSet<u32> {
        &self.requested
    }

    /// Adds `address`; returns the set to send, or `None` when unchanged.
    pub fn set(&mut self, address: u32) -> Option<Vec<u32>> {
        self.requested.insert(address).then(|| self.snapshot())
    }

    /// Removes `address`; returns the set to send, or `None` when unchanged.
    pub fn clear(&mut self, address: u32) -> Option<Vec<u32>> {
        self.requested.remove(&address).then(|| self.snapshot())
    }

    pub fn toggle(&mut self, address: u32) -> Vec<u32> {
        if !self.requested.remove(&address) {
            self.requested.insert(address);
        }
        self.snapshot()
    }

    /// Full requested set, for resending to a fresh process.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u32> {
        self.requested.iter().copied().collect()
    }

    pub fn track(&mut self, seq: u32) {
        self.in_flight.insert(seq);
    }

    #[must_use]
    pub fn is_tracking(&self, seq: u32) -> bool {
        self.in_flight.contains(&seq)
    }

    /// Applies an acknowledged reply carrying the verified addresses.
    pub fn acknowledge(&mut self, seq: u32, verified: &[u32]) -> BreakpointUpdate {
        if !self.in_flight.remove(&seq) {
            debug!(seq, "unknown setInstructionBreakpoints request");
            return BreakpointUpdate::Unknown;
        }
        let verified: BTreeSet<u32> = verified.iter().copied().collect();
        for dropped in self.requested.difference(&verified) {
            warn!("breakpoint at 0x{dropped:x} was not verified");
        }
        self.confirmed = verified;
        self.requested = self.confirmed.clone();
        BreakpointUpdate::Applied(self.confirmed.clone())
    }

    /// Applies a failed reply: local intent falls back to the confirmed set.
    pub fn reject(&mut self, seq: u32) -> BreakpointUpdate {
        if !self.in_flight.remove(&seq) {
            debug!(seq, "unknown setInstructionBreakpoints request");
            return BreakpointUpdate::Unknown;
        }
        self.requested = self.confirmed.clone();
        BreakpointUpdate::Applied(self.confirmed.clone())
    }

    /// Forgets in-flight requests of a process that is gone.
    pub fn abandon_in_flight(&mut self) {
        self.in_flight.clear();
    }
}
