use crate::{events::EventsSender, Error};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::error;

type ErrorFn = Box<dyn FnMut(Error) + Send + 'static>;

/// Catch-all sink for errors nobody is awaiting: failing hook callbacks, listener handlers,
/// messages that could not be flushed, fatal handshake errors.
#[derive(Clone)]
pub(crate) struct ErrorHandler {
    handler: Arc<Mutex<Option<ErrorFn>>>,
    events: EventsSender,
}

impl ErrorHandler {
    pub(crate) fn new(events: EventsSender) -> Self {
        Self {
            handler: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub(crate) fn set_handler<E: FnMut(Error) + Send + 'static>(&self, handler: E) {
        *self.handler.lock() = Some(Box::new(handler));
    }

    pub(crate) fn on_error(&self, error: Error) {
        self.events.error(error.clone());
        if let Some(handler) = self.handler.lock().as_mut() {
            handler(error)
        } else {
            error!(%error, "Unhandled error.");
        }
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorHandler").finish()
    }
}
