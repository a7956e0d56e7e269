use crate::{
    error_handler::ErrorHandler, signal::LifecycleSignal, transport::ProtocolChannel, Error,
};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{trace, warn};

/// The lifecycle checkpoints callers can wait on or subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The transport to the broker is established
    ConnectionMade,
    /// Credentials were accepted and a channel is open
    Authenticated,
    /// Messages queued while disconnected were sent, the connection is ready
    InitialSend,
    /// A ready (or authenticated) connection went away
    ConnectionLost,
    /// A connection attempt failed before completing its handshake
    ConnectionFailed,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::ConnectionMade,
        Phase::Authenticated,
        Phase::InitialSend,
        Phase::ConnectionLost,
        Phase::ConnectionFailed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn hook_name(&self) -> &'static str {
        match self {
            Phase::ConnectionMade => "on_connection_made",
            Phase::Authenticated => "on_authenticated",
            Phase::InitialSend => "on_initial_send",
            Phase::ConnectionLost => "on_connection_lost",
            Phase::ConnectionFailed => "on_connection_failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

/// What a lifecycle signal or subscription receives when its phase is reached.
#[derive(Clone)]
pub struct PhaseEvent {
    attempt: u64,
    phase: Phase,
    channel: Option<Arc<dyn ProtocolChannel>>,
    error: Option<Error>,
}

impl PhaseEvent {
    pub(crate) fn new(attempt: u64, phase: Phase) -> Self {
        Self {
            attempt,
            phase,
            channel: None,
            error: None,
        }
    }

    pub(crate) fn with_channel(mut self, channel: Arc<dyn ProtocolChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub(crate) fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The open channel, for `Authenticated` and `InitialSend`.
    pub fn channel(&self) -> Option<&Arc<dyn ProtocolChannel>> {
        self.channel.as_ref()
    }

    /// Why the attempt ended, for `ConnectionLost` and `ConnectionFailed`.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }
}

impl fmt::Debug for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseEvent")
            .field("attempt", &self.attempt)
            .field("phase", &self.phase)
            .field("channel", &self.channel.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// Outcome of a user-supplied callback.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub(crate) type Callback = Arc<dyn Fn(&PhaseEvent) -> HookResult + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Hooks {
    inner: Arc<Mutex<Inner>>,
    error_handler: ErrorHandler,
}

struct Inner {
    signals: [LifecycleSignal; 5],
    subscribers: Vec<(Phase, Callback)>,
    cancelled: Option<Error>,
}

impl Hooks {
    pub(crate) fn new(error_handler: ErrorHandler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                signals: Phase::ALL.map(LifecycleSignal::new),
                subscribers: Vec::new(),
                cancelled: None,
            })),
            error_handler,
        }
    }

    pub(crate) fn signal(&self, phase: Phase) -> LifecycleSignal {
        let inner = self.inner.lock();
        match &inner.cancelled {
            Some(error) => LifecycleSignal::rejected(phase, error.clone()),
            None => inner.signals[phase.index()].clone(),
        }
    }

    pub(crate) fn subscribe(&self, phase: Phase, callback: Callback) {
        self.inner.lock().subscribers.push((phase, callback));
    }

    /// Swap in a fresh signal for the phase, run the subscribers, then release the waiters of
    /// the old signal.
    pub(crate) fn fire(&self, event: PhaseEvent) -> bool {
        let phase = event.phase();
        let (signal, subscribers) = {
            let mut inner = self.inner.lock();
            if inner.cancelled.is_some() {
                trace!(%phase, attempt = event.attempt(), "Hooks were cancelled, not firing.");
                return false;
            }
            let signal = std::mem::replace(
                &mut inner.signals[phase.index()],
                LifecycleSignal::new(phase),
            );
            let subscribers = inner
                .subscribers
                .iter()
                .filter(|(p, _)| *p == phase)
                .map(|(_, callback)| callback.clone())
                .collect::<Vec<_>>();
            (signal, subscribers)
        };
        for callback in subscribers {
            self.run_callback(&callback, &event);
        }
        signal.complete(Ok(event))
    }

    fn run_callback(&self, callback: &Callback, event: &PhaseEvent) {
        let reason = match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error.to_string(),
            Err(payload) => panic_reason(payload),
        };
        warn!(
            phase = %event.phase(),
            attempt = event.attempt(),
            %reason,
            "Lifecycle hook callback failed.",
        );
        self.error_handler
            .on_error(Error::HookCallback(event.phase(), reason));
    }

    /// Reject every pending signal, and every signal handed out from now on.
    pub(crate) fn cancel(&self, error: Error) {
        let signals = {
            let mut inner = self.inner.lock();
            if inner.cancelled.is_some() {
                return;
            }
            inner.cancelled = Some(error.clone());
            inner.signals.clone()
        };
        for signal in signals {
            signal.complete(Err(error.clone()));
        }
    }
}

pub(crate) fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|reason| (*reason).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "callback panicked".to_owned())
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Hooks");
        if let Some(inner) = self.inner.try_lock() {
            debug
                .field("subscribers", &inner.subscribers.len())
                .field("cancelled", &inner.cancelled);
        }
        debug.finish()
    }
}
