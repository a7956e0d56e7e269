use crate::{connection_status::LifecyclePhase, Error};
use flume::{self, Receiver, Sender};
use futures_core::Stream;
use std::{sync::Arc, time::Duration};

/// Broadcast of factory events to whoever called `ReconnectingFactory::events`.
#[derive(Clone, Debug)]
// The receiver kept here must stay the only internal one, hence the Arc
pub(crate) struct Events(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
}

impl Events {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self(Arc::new(Inner { sender, receiver }))
    }

    pub(crate) fn sender(&self) -> EventsSender {
        EventsSender(self.0.sender.clone())
    }

    pub(crate) fn listener(&self) -> impl Stream<Item = Event> + Send + 'static {
        self.0.receiver.clone().into_stream()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EventsSender(Sender<Event>);

impl EventsSender {
    fn send(&self, event: Event) {
        // Nobody listens until events() was called, don't let them pile up
        if self.0.receiver_count() > 1 {
            let _ = self.0.send(event);
        }
    }

    pub(crate) fn phase_changed(&self, attempt: u64, phase: LifecyclePhase) {
        self.send(Event::PhaseChanged { attempt, phase });
    }

    pub(crate) fn retry_scheduled(&self, attempt: u32, delay: Duration) {
        self.send(Event::RetryScheduled { attempt, delay });
    }

    pub(crate) fn error(&self, error: Error) {
        self.send(Event::Error(error));
    }
}

/// Something that happened to a [`ReconnectingFactory`].
///
/// [`ReconnectingFactory`]: ./struct.ReconnectingFactory.html
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    PhaseChanged { attempt: u64, phase: LifecyclePhase },
    /// `attempt` counts consecutive failures since the last ready connection
    RetryScheduled { attempt: u32, delay: Duration },
    Error(Error),
}
