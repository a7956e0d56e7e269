use crate::{schema::ExchangeDeclaration, transport::Message, Error, Result};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

/// A message waiting for the connection to be ready.
#[derive(Clone, Debug)]
pub(crate) struct Pending {
    pub(crate) exchange: ExchangeDeclaration,
    pub(crate) message: Message,
}

/// Messages published while not ready, sent in order before `InitialSend` fires.
///
/// The outbox only switches to ready once it is drained, under the same lock that accepts
/// new messages, so nothing published during a flush can overtake what was queued before.
/// With a capacity, publishing to a full outbox fails with [`Error::OutboxFull`].
///
/// [`Error::OutboxFull`]: ./enum.Error.html#variant.OutboxFull
#[derive(Clone, Debug, Default)]
pub(crate) struct Outbox(Arc<Mutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Pending>,
    ready: bool,
    capacity: Option<usize>,
}

impl Inner {
    fn push_back(&mut self, pending: Pending) -> Result<()> {
        match self.capacity {
            Some(capacity) if self.pending.len() >= capacity => Err(Error::OutboxFull(capacity)),
            _ => {
                self.pending.push_back(pending);
                Ok(())
            }
        }
    }
}

impl Outbox {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            capacity,
            ..Inner::default()
        })))
    }

    /// Queue the message unless we're ready, in which case it is handed back to be sent now.
    pub(crate) fn push_unless_ready(&self, pending: Pending) -> Result<Option<Pending>> {
        let mut inner = self.0.lock();
        if inner.ready {
            Ok(Some(pending))
        } else {
            inner.push_back(pending)?;
            Ok(None)
        }
    }

    pub(crate) fn push(&self, pending: Pending) -> Result<()> {
        self.0.lock().push_back(pending)
    }

    /// Put back a message that could not be sent, ahead of everything else.
    pub(crate) fn requeue(&self, pending: Pending) {
        let mut inner = self.0.lock();
        inner.ready = false;
        inner.pending.push_front(pending);
    }

    /// The next message to flush, or `None` after switching to ready.
    pub(crate) fn pop_or_ready(&self) -> Option<Pending> {
        let mut inner = self.0.lock();
        let next = inner.pending.pop_front();
        if next.is_none() {
            inner.ready = true;
        }
        next
    }

    pub(crate) fn set_unready(&self) {
        self.0.lock().ready = false;
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().pending.len()
    }
}
