//! Shared control state between the scheduler and its runners.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Commands an embedding application can send to a running test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Cooperative stop: runners exit at their next iteration boundary.
    Stop,
}

/// Process-wide flags observed cooperatively by every runner between
/// iterations. Never interrupts an in-flight request.
pub struct ControlState {
    stopped: AtomicBool,
    active_vus: AtomicUsize,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            active_vus: AtomicUsize::new(0),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn set_active_vus(&self, count: usize) {
        self.active_vus.store(count, Ordering::SeqCst);
    }

    pub fn active_vus(&self) -> usize {
        self.active_vus.load(Ordering::SeqCst)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_flag() {
        let state = ControlState::new();
        assert!(!state.is_stopped());
        state.stop();
        assert!(state.is_stopped());
    }

    #[test]
    fn test_active_vus() {
        let state = ControlState::new();
        assert_eq!(state.active_vus(), 0);
        state.set_active_vus(25);
        assert_eq!(state.active_vus(), 25);
    }
}
