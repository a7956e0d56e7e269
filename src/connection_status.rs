use crate::events::EventsSender;
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::trace;

/// Where the factory stands in its connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// `connect()` was never called
    #[default]
    Idle,
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    /// Authenticated, and everything queued while disconnected was sent
    Ready,
    Failed,
}

impl LifecyclePhase {
    pub fn has_channel(&self) -> bool {
        matches!(self, LifecyclePhase::Authenticated | LifecyclePhase::Ready)
    }
}

#[derive(Clone)]
pub struct ConnectionStatus(Arc<Mutex<Inner>>);

impl ConnectionStatus {
    pub(crate) fn new(events: EventsSender) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            phase: LifecyclePhase::default(),
            attempt: 0,
            terminated: false,
            events,
        })))
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.0.lock().phase
    }

    /// Identifier of the current (or last) connection attempt, starting at 1.
    pub fn attempt(&self) -> u64 {
        self.0.lock().attempt
    }

    pub fn ready(&self) -> bool {
        self.0.lock().phase == LifecyclePhase::Ready
    }

    pub fn terminated(&self) -> bool {
        self.0.lock().terminated
    }

    pub(crate) fn next_attempt(&self) -> u64 {
        let mut inner = self.0.lock();
        inner.attempt += 1;
        inner.attempt
    }

    /// Transitions coming from a stale attempt, or after termination, are ignored.
    pub(crate) fn set_phase(&self, attempt: u64, phase: LifecyclePhase) -> bool {
        let mut inner = self.0.lock();
        if inner.terminated || inner.attempt != attempt {
            trace!(attempt, ?phase, current = inner.attempt, "Ignoring stale phase transition.");
            return false;
        }
        inner.set_phase(phase);
        true
    }

    /// Settle in a final phase. Returns false if we were already terminated.
    pub(crate) fn terminate(&self, phase: LifecyclePhase) -> bool {
        let mut inner = self.0.lock();
        if inner.terminated {
            return false;
        }
        inner.set_phase(phase);
        inner.terminated = true;
        true
    }
}

impl fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ConnectionStatus");
        if let Some(inner) = self.0.try_lock() {
            debug
                .field("phase", &inner.phase)
                .field("attempt", &inner.attempt)
                .field("terminated", &inner.terminated);
        }
        debug.finish()
    }
}

struct Inner {
    phase: LifecyclePhase,
    attempt: u64,
    terminated: bool,
    events: EventsSender,
}

impl Inner {
    fn set_phase(&mut self, phase: LifecyclePhase) {
        if self.phase != phase {
            trace!(attempt = self.attempt, from = ?self.phase, to = ?phase, "Lifecycle phase change.");
            self.phase = phase;
            self.events.phase_changed(self.attempt, phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Events;

    #[test]
    fn stale_attempts_are_ignored() {
        let status = ConnectionStatus::new(Events::new().sender());
        let first = status.next_attempt();
        assert!(status.set_phase(first, LifecyclePhase::Connecting));
        let second = status.next_attempt();
        assert!(!status.set_phase(first, LifecyclePhase::Ready));
        assert!(status.set_phase(second, LifecyclePhase::Connected));
        assert_eq!(status.phase(), LifecyclePhase::Connected);
        assert_eq!(status.attempt(), 2);
    }

    #[test]
    fn terminate_is_final() {
        let status = ConnectionStatus::new(Events::new().sender());
        let attempt = status.next_attempt();
        assert!(status.terminate(LifecyclePhase::Disconnected));
        assert!(!status.terminate(LifecyclePhase::Failed));
        assert!(!status.set_phase(attempt, LifecyclePhase::Ready));
        assert_eq!(status.phase(), LifecyclePhase::Disconnected);
        assert!(status.terminated());
    }
}
