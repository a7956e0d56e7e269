use crate::{
    hooks::{Phase, PhaseEvent},
    notifier::Wakers,
    Error, Result,
};
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tracing::trace;

/// One-shot broadcast of a lifecycle phase being reached.
///
/// Every clone of a signal observes the same outcome: once the phase fires (or the factory
/// shuts down), all waiters are released with a copy of the [`PhaseEvent`] (or the error).
/// A signal fires at most once; the factory installs a fresh one for the next attempt.
///
/// [`PhaseEvent`]: ./struct.PhaseEvent.html
#[must_use = "LifecycleSignal does nothing unless awaited"]
#[derive(Clone)]
pub struct LifecycleSignal {
    phase: Phase,
    state: Arc<Mutex<State>>,
}

enum State {
    Pending(Wakers),
    Fired(Result<PhaseEvent>),
}

impl LifecycleSignal {
    pub(crate) fn new(phase: Phase) -> Self {
        Self {
            phase,
            state: Arc::new(Mutex::new(State::Pending(Wakers::default()))),
        }
    }

    pub(crate) fn rejected(phase: Phase, error: Error) -> Self {
        let signal = Self::new(phase);
        signal.complete(Err(error));
        signal
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_fired(&self) -> bool {
        matches!(*self.state.lock(), State::Fired(_))
    }

    /// The outcome, if the signal already fired.
    pub fn try_wait(&self) -> Option<Result<PhaseEvent>> {
        match &*self.state.lock() {
            State::Fired(outcome) => Some(outcome.clone()),
            State::Pending(_) => None,
        }
    }

    /// Returns false if the signal had already fired, leaving the first outcome in place.
    pub(crate) fn complete(&self, outcome: Result<PhaseEvent>) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            State::Fired(_) => {
                trace!(phase = %self.phase, "Lifecycle signal already fired.");
                false
            }
            State::Pending(wakers) => {
                trace!(phase = %self.phase, ok = outcome.is_ok(), "Firing lifecycle signal.");
                let mut wakers = std::mem::take(wakers);
                *state = State::Fired(outcome);
                drop(state);
                wakers.wake();
                true
            }
        }
    }
}

impl Future for LifecycleSignal {
    type Output = Result<PhaseEvent>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut *self.state.lock() {
            State::Fired(outcome) => Poll::Ready(outcome.clone()),
            State::Pending(wakers) => {
                wakers.register(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for LifecycleSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleSignal")
            .field("phase", &self.phase)
            .field("fired", &self.is_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future;

    #[test]
    fn releases_every_waiter_once() {
        let signal = LifecycleSignal::new(Phase::Authenticated);
        let mut first = signal.clone();
        let mut second = signal.clone();
        assert!(future::block_on(future::poll_once(&mut first)).is_none());
        assert!(future::block_on(future::poll_once(&mut second)).is_none());

        assert!(signal.complete(Ok(PhaseEvent::new(1, Phase::Authenticated))));
        assert!(!signal.complete(Ok(PhaseEvent::new(2, Phase::Authenticated))));

        let first = future::block_on(first).unwrap();
        let second = future::block_on(second).unwrap();
        assert_eq!(first.attempt(), 1);
        assert_eq!(second.attempt(), 1);
    }

    #[test]
    fn late_waiters_see_the_outcome() {
        let signal = LifecycleSignal::new(Phase::ConnectionMade);
        assert!(signal.try_wait().is_none());
        signal.complete(Ok(PhaseEvent::new(3, Phase::ConnectionMade)));
        assert!(signal.is_fired());
        let event = future::block_on(signal.clone()).unwrap();
        assert_eq!(event.attempt(), 3);
        assert_eq!(event.phase(), Phase::ConnectionMade);
    }

    #[test]
    fn rejected_signal() {
        let signal = LifecycleSignal::rejected(Phase::InitialSend, Error::Shutdown);
        assert_eq!(future::block_on(signal).unwrap_err(), Error::Shutdown);
    }
}
