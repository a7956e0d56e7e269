use crate::{
    error_handler::ErrorHandler,
    hooks::{panic_reason, HookResult},
    runtime::Runtime,
    schema::Replacements,
    session::ProtocolSession,
    transport::{Delivery, ProtocolChannel},
    Error, Result,
};
use flume::Receiver;
use parking_lot::Mutex;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::{debug, trace, warn};

pub(crate) type DeliveryHandler = Arc<dyn Fn(&Delivery) -> HookResult + Send + Sync>;

/// A consumer that outlives connections: it is set up again on every new session.
#[derive(Clone)]
pub(crate) struct Listener {
    queue: String,
    replacements: Option<Replacements>,
    handler: DeliveryHandler,
    started_on: Arc<Mutex<u64>>,
}

impl Listener {
    pub(crate) fn new(
        queue: &str,
        replacements: Option<Replacements>,
        handler: DeliveryHandler,
    ) -> Self {
        Self {
            queue: queue.into(),
            replacements,
            handler,
            started_on: Arc::default(),
        }
    }

    /// Only the first caller for a given attempt gets to start the listener.
    fn claim(&self, attempt: u64) -> bool {
        let mut started_on = self.started_on.lock();
        if *started_on == attempt {
            false
        } else {
            *started_on = attempt;
            true
        }
    }

    /// Provision the queue on the session and start consuming from it.
    pub(crate) async fn start(
        &self,
        session: &ProtocolSession,
        runtime: &dyn Runtime,
        errors: &ErrorHandler,
    ) -> Result<()> {
        if !self.claim(session.attempt()) {
            return Ok(());
        }
        let provisioner = session.provisioner().await?;
        let queue = provisioner
            .create_queue(&self.queue, self.replacements.as_ref())
            .await?;
        let channel = provisioner.channel().clone();
        let deliveries = channel.basic_consume(&queue.name, "").await?;
        debug!(
            attempt = session.attempt(),
            logical_name = %self.queue,
            queue = %queue.name,
            "Listening.",
        );
        runtime.spawn(Box::pin(self.clone().consume(
            queue.name,
            channel,
            deliveries,
            errors.clone(),
        )));
        Ok(())
    }

    /// Hand every delivery to the handler, acking on success and rejecting otherwise.
    async fn consume(
        self,
        queue: String,
        channel: Arc<dyn ProtocolChannel>,
        deliveries: Receiver<Delivery>,
        errors: ErrorHandler,
    ) {
        while let Ok(delivery) = deliveries.recv_async().await {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(&delivery)))
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => Err(error.to_string()),
                Err(payload) => Err(panic_reason(payload)),
            };
            let acknowledged = match outcome {
                Ok(()) => channel.basic_ack(delivery.delivery_tag).await,
                Err(reason) => {
                    warn!(%queue, delivery_tag = delivery.delivery_tag, %reason, "Listener failed.");
                    errors.on_error(Error::ListenerCallback {
                        queue: queue.clone(),
                        reason,
                    });
                    channel.basic_reject(delivery.delivery_tag, false).await
                }
            };
            if let Err(error) = acknowledged {
                trace!(%queue, %error, "Failed to acknowledge delivery, stopping consumer.");
                break;
            }
        }
        trace!(%queue, "Consumer ended.");
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("queue", &self.queue)
            .field("replacements", &self.replacements)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Listeners(Arc<Mutex<Vec<Listener>>>);

impl Listeners {
    pub(crate) fn register(&self, listener: Listener) {
        self.0.lock().push(listener);
    }

    pub(crate) fn all(&self) -> Vec<Listener> {
        self.0.lock().clone()
    }
}
