//! Mutual exclusion between poll cycles and writes.
//!
//! The gate is a check-and-set token: a caller that finds it held gets
//! nothing back and is expected to skip, never to wait.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What the module is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Buses not initialised yet
    Uninitialized,
    /// Ready for a poll cycle or a write
    Idle,
    Reading,
    Writing,
}

impl ModuleState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModuleState::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Uninitialized => "uninitialized",
            ModuleState::Idle => "idle",
            ModuleState::Reading => "reading",
            ModuleState::Writing => "writing",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Slot {
    state: ModuleState,
    errors: bool,
}

/// Shared state token.
#[derive(Debug, Clone)]
pub struct StateGate {
    slot: Arc<Mutex<Slot>>,
}

impl Default for StateGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StateGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                state: ModuleState::Uninitialized,
                errors: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave `Uninitialized` once the buses have been set up.
    pub fn mark_ready(&self) {
        let mut slot = self.lock();
        if slot.state == ModuleState::Uninitialized {
            slot.state = ModuleState::Idle;
        }
    }

    /// Start a poll cycle. Clears the error flag.
    pub fn try_begin_read(&self) -> Option<GateGuard> {
        let mut slot = self.lock();
        if !slot.state.is_ready() {
            return None;
        }
        slot.state = ModuleState::Reading;
        slot.errors = false;
        Some(GateGuard { gate: self.clone() })
    }

    pub fn try_begin_write(&self) -> Option<GateGuard> {
        let mut slot = self.lock();
        if !slot.state.is_ready() {
            return None;
        }
        slot.state = ModuleState::Writing;
        Some(GateGuard { gate: self.clone() })
    }

    /// Flag that the current cycle produced at least one failure.
    pub fn record_errors(&self) {
        self.lock().errors = true;
    }

    pub fn state(&self) -> ModuleState {
        self.lock().state
    }

    /// Whether the last poll cycle had failures.
    pub fn errors(&self) -> bool {
        self.lock().errors
    }

    fn release(&self) {
        let mut slot = self.lock();
        if matches!(slot.state, ModuleState::Reading | ModuleState::Writing) {
            slot.state = ModuleState::Idle;
        }
    }
}

/// Holds the gate until dropped.
#[derive(Debug)]
pub struct GateGuard {
    gate: StateGate,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_refuses_everything() {
        let gate = StateGate::new();
        assert!(gate.try_begin_read().is_none());
        assert!(gate.try_begin_write().is_none());
        assert_eq!(gate.state(), ModuleState::Uninitialized);
    }

    #[test]
    fn test_read_excludes_write_and_read() {
        let gate = StateGate::new();
        gate.mark_ready();

        let guard = gate.try_begin_read().unwrap();
        assert_eq!(gate.state(), ModuleState::Reading);
        assert!(gate.try_begin_read().is_none());
        assert!(gate.try_begin_write().is_none());

        drop(guard);
        assert_eq!(gate.state(), ModuleState::Idle);
        assert!(gate.try_begin_write().is_some());
    }

    #[test]
    fn test_errors_reset_on_new_cycle() {
        let gate = StateGate::new();
        gate.mark_ready();

        {
            let _guard = gate.try_begin_read().unwrap();
            gate.record_errors();
        }
        assert!(gate.errors());

        let _guard = gate.try_begin_read().unwrap();
        assert!(!gate.errors());
    }

    #[test]
    fn test_write_keeps_error_flag() {
        let gate = StateGate::new();
        gate.mark_ready();
        {
            let _guard = gate.try_begin_read().unwrap();
            gate.record_errors();
        }

        let guard = gate.try_begin_write().unwrap();
        assert_eq!(gate.state(), ModuleState::Writing);
        drop(guard);
        assert!(gate.errors());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ModuleState::Reading).unwrap(),
            "\"reading\""
        );
    }
}
