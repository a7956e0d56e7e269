use crate::{
    backoff::Backoff,
    connection_status::{ConnectionStatus, LifecyclePhase},
    error_handler::ErrorHandler,
    events::{Event, Events},
    hooks::{HookResult, Hooks, Phase, PhaseEvent},
    listeners::{Listener, Listeners},
    notifier::Notifier,
    outbox::{Outbox, Pending},
    runtime::{self, Runtime},
    schema::{QueueDeclaration, QueueSchema, Replacements, SchemaProvider},
    session::ProtocolSession,
    signal::LifecycleSignal,
    transport::{Delivery, Message, ProtocolChannel, Transport},
    BasicProperties, ConnectionInfo, Error, ReconnectConfig, Result,
};
use futures_core::Stream;
use futures_lite::future;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info, trace, warn};

/// Keeps one logical connection to the broker alive across failures.
///
/// Every attempt gets its own [`ProtocolSession`]. Whatever happens to it is reported
/// through the lifecycle signals (`on_connection_made`, `on_authenticated`,
/// `on_initial_send`, `on_connection_lost` and `on_connection_failed`), after which the
/// factory waits for the backoff delay and tries again, until [`shutdown`] is called.
///
/// [`ProtocolSession`]: ./struct.ProtocolSession.html
/// [`shutdown`]: #method.shutdown
#[derive(Clone)]
pub struct ReconnectingFactory {
    inner: Arc<Inner>,
}

struct Inner {
    info: ConnectionInfo,
    transport: Arc<dyn Transport>,
    schema: Arc<dyn SchemaProvider>,
    runtime: Arc<dyn Runtime>,
    status: ConnectionStatus,
    backoff: Mutex<Backoff>,
    hooks: Hooks,
    error_handler: ErrorHandler,
    events: Events,
    outbox: Outbox,
    listeners: Listeners,
    session: Mutex<Option<ProtocolSession>>,
    running: AtomicBool,
    shutdown: Notifier,
}

/// Builds a [`ReconnectingFactory`].
///
/// Without an explicit transport the lapin one is used (feature `lapin`), without an
/// explicit runtime the default one (feature `default-runtime`), without a schema an empty
/// one.
///
/// [`ReconnectingFactory`]: ./struct.ReconnectingFactory.html
#[must_use = "FactoryBuilder does nothing unless built"]
pub struct FactoryBuilder {
    info: ConnectionInfo,
    transport: Option<Arc<dyn Transport>>,
    schema: Option<Arc<dyn SchemaProvider>>,
    runtime: Option<Arc<dyn Runtime>>,
    reconnect: ReconnectConfig,
}

impl FactoryBuilder {
    pub fn with_transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn with_schema<S: SchemaProvider + 'static>(mut self, schema: S) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_runtime<R: Runtime>(mut self, runtime: R) -> Self {
        self.runtime = Some(Arc::new(runtime));
        self
    }

    pub fn with_reconnect_config(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> Result<ReconnectingFactory> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => runtime::default_runtime()?,
        };
        let schema = self
            .schema
            .unwrap_or_else(|| Arc::new(QueueSchema::default()));
        let outbox = Outbox::new(self.reconnect.max_queued_messages());
        let events = Events::new();
        let error_handler = ErrorHandler::new(events.sender());
        Ok(ReconnectingFactory {
            inner: Arc::new(Inner {
                info: self.info,
                transport,
                schema,
                runtime,
                status: ConnectionStatus::new(events.sender()),
                backoff: Mutex::new(Backoff::new(self.reconnect)),
                hooks: Hooks::new(error_handler.clone()),
                error_handler,
                events,
                outbox,
                listeners: Listeners::default(),
                session: Mutex::new(None),
                running: AtomicBool::new(false),
                shutdown: Notifier::default(),
            }),
        })
    }
}

impl fmt::Debug for FactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryBuilder")
            .field("info", &self.info)
            .field("runtime", &self.runtime)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

#[cfg(feature = "lapin")]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::lapin_transport::LapinTransport::default()))
}

#[cfg(not(feature = "lapin"))]
fn default_transport() -> Result<Arc<dyn Transport>> {
    Err(Error::NoDefaultTransport)
}

impl ReconnectingFactory {
    pub fn builder(info: ConnectionInfo) -> FactoryBuilder {
        FactoryBuilder {
            info,
            transport: None,
            schema: None,
            runtime: None,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Start connecting in the background. Calling it again while the factory is running
    /// does nothing; calling it after [`shutdown`] is an error.
    ///
    /// [`shutdown`]: #method.shutdown
    pub fn connect(&self) -> Result<()> {
        if self.inner.status.terminated() {
            return Err(Error::InvalidState(self.inner.status.phase()));
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            trace!("Reconnect loop already running.");
            return Ok(());
        }
        let factory = self.clone();
        self.inner.runtime.spawn(Box::pin(factory.run()));
        Ok(())
    }

    async fn run(self) {
        let inner = &self.inner;
        while !inner.shutdown.notified() {
            let attempt = inner.status.next_attempt();
            let session = ProtocolSession::new(
                attempt,
                inner.info.clone(),
                inner.hooks.clone(),
                inner.status.clone(),
                inner.schema.clone(),
            );
            *inner.session.lock() = Some(session.clone());

            let error = match self.interruptible(session.establish(&*inner.transport)).await {
                None => break,
                Some(Ok(())) => match self.interruptible(self.serve(&session)).await {
                    None => break,
                    Some(error) => {
                        inner.outbox.set_unready();
                        warn!(attempt, %error, "Connection lost.");
                        session.connection_lost(error.clone());
                        error
                    }
                },
                Some(Err(error)) => {
                    warn!(attempt, %error, "Connection attempt failed.");
                    session.connection_failed(error.clone());
                    if !error.is_retryable() {
                        inner.error_handler.on_error(error.clone());
                    }
                    error
                }
            };
            self.close_in_background(session);

            if inner.shutdown.notified() {
                break;
            }
            let (delay, retry) = {
                let mut backoff = inner.backoff.lock();
                (backoff.next_delay(), backoff.attempt_count())
            };
            let Some(delay) = delay else {
                error!(attempt, retry, %error, "Giving up reconnecting.");
                inner.status.terminate(LifecyclePhase::Failed);
                inner.hooks.cancel(error);
                break;
            };
            info!(attempt, retry, ?delay, "Scheduling reconnection.");
            inner.events.sender().retry_scheduled(retry, delay);
            inner.status.set_phase(attempt, LifecyclePhase::Connecting);
            if self
                .interruptible(inner.runtime.sleep(delay))
                .await
                .is_none()
            {
                break;
            }
        }
        let session = inner.session.lock().take();
        if let Some(session) = session.filter(|session| !session.is_terminated()) {
            if let Err(error) = session.close().await {
                trace!(%error, "Failed to close session.");
            }
        }
        debug!("Reconnect loop stopped.");
    }

    /// Everything between `Authenticated` and the connection going away.
    async fn serve(&self, session: &ProtocolSession) -> Error {
        if let Err(error) = self.start_listeners(session).await {
            return error;
        }
        if let Err(error) = self.flush(session).await {
            return error;
        }
        self.inner.backoff.lock().reset();
        info!(attempt = session.attempt(), "Connection ready.");
        if let Err(error) = session.initial_send_done() {
            return error;
        }
        session.closed().await
    }

    async fn start_listeners(&self, session: &ProtocolSession) -> Result<()> {
        for listener in self.inner.listeners.all() {
            if let Err(error) = listener
                .start(session, &*self.inner.runtime, &self.inner.error_handler)
                .await
            {
                if error.is_retryable() {
                    return Err(error);
                }
                self.inner.error_handler.on_error(error);
            }
        }
        Ok(())
    }

    async fn flush(&self, session: &ProtocolSession) -> Result<()> {
        let outbox = &self.inner.outbox;
        let queued = outbox.len();
        if queued > 0 {
            debug!(attempt = session.attempt(), queued, "Flushing queued messages.");
        }
        while let Some(pending) = outbox.pop_or_ready() {
            let sent = match session.provisioner().await {
                Ok(provisioner) => provisioner.publish(&pending.exchange, &pending.message).await,
                Err(error) => Err(error),
            };
            match sent {
                Ok(()) => {}
                Err(error) if error.is_retryable() => {
                    outbox.requeue(pending);
                    return Err(error);
                }
                Err(error) => {
                    warn!(exchange = %pending.message.exchange, %error, "Dropping queued message.");
                    self.inner.error_handler.on_error(error);
                }
            }
        }
        Ok(())
    }

    fn close_in_background(&self, session: ProtocolSession) {
        self.inner.runtime.spawn(Box::pin(async move {
            if let Err(error) = session.close().await {
                trace!(attempt = session.attempt(), %error, "Failed to close session.");
            }
        }));
    }

    /// Run the future unless we get shut down first.
    async fn interruptible<T, F: Future<Output = T>>(&self, f: F) -> Option<T> {
        let shutdown = self.inner.shutdown.clone();
        future::or(
            async move {
                shutdown.await;
                None
            },
            async move { Some(f.await) },
        )
        .await
    }

    /// Stop reconnecting: cancel the pending backoff sleep or handshake, close the current
    /// session and reject every pending lifecycle signal with [`Error::Shutdown`].
    ///
    /// [`Error::Shutdown`]: ./enum.Error.html#variant.Shutdown
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.status.terminate(LifecyclePhase::Disconnected) {
            info!(attempt = inner.status.attempt(), "Shutting down.");
        }
        inner.shutdown.notify_all();
        inner.hooks.cancel(Error::Shutdown);
        inner.outbox.set_unready();
        let session = inner.session.lock().take();
        match session {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    pub fn on_connection_made(&self) -> LifecycleSignal {
        self.inner.hooks.signal(Phase::ConnectionMade)
    }

    pub fn on_authenticated(&self) -> LifecycleSignal {
        self.inner.hooks.signal(Phase::Authenticated)
    }

    pub fn on_initial_send(&self) -> LifecycleSignal {
        self.inner.hooks.signal(Phase::InitialSend)
    }

    pub fn on_connection_lost(&self) -> LifecycleSignal {
        self.inner.hooks.signal(Phase::ConnectionLost)
    }

    pub fn on_connection_failed(&self) -> LifecycleSignal {
        self.inner.hooks.signal(Phase::ConnectionFailed)
    }

    /// The signal for the next firing of `phase`.
    pub fn signal(&self, phase: Phase) -> LifecycleSignal {
        self.inner.hooks.signal(phase)
    }

    /// Run `callback` on every firing of `phase`. A callback returning an error, or
    /// panicking, is reported to the error handler and doesn't stop the other callbacks.
    pub fn subscribe<F>(&self, phase: Phase, callback: F)
    where
        F: Fn(&PhaseEvent) -> HookResult + Send + Sync + 'static,
    {
        self.inner.hooks.subscribe(phase, Arc::new(callback));
    }

    /// Receive the errors nobody is waiting for. They are logged if no handler is set.
    pub fn on_error<E: FnMut(Error) + Send + 'static>(&self, handler: E) {
        self.inner.error_handler.set_handler(handler);
    }

    pub fn events(&self) -> impl Stream<Item = Event> + Send + 'static {
        self.inner.events.listener()
    }

    /// Declare a queue described by the schema on the current connection.
    ///
    /// Fails with [`Error::NotConnected`] if no attempt was made yet, and with
    /// [`Error::ChannelUnavailable`] if the current attempt isn't authenticated.
    ///
    /// [`Error::NotConnected`]: ./enum.Error.html#variant.NotConnected
    /// [`Error::ChannelUnavailable`]: ./enum.Error.html#variant.ChannelUnavailable
    pub async fn create_queue(
        &self,
        logical_name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<QueueDeclaration> {
        let session = self.session().ok_or(Error::NotConnected)?;
        session
            .provisioner()
            .await?
            .create_queue(logical_name, replacements)
            .await
    }

    /// Publish to the exchange registered as `exchange` in the schema.
    ///
    /// While the connection isn't ready the message is queued, and sent before
    /// `on_initial_send` fires for the next ready connection. The queue grows for as long as
    /// the outage lasts unless [`ReconnectConfig::with_max_queued_messages`] caps it, in
    /// which case publishing to a full queue fails with [`Error::OutboxFull`].
    ///
    /// [`ReconnectConfig::with_max_queued_messages`]: ./struct.ReconnectConfig.html#method.with_max_queued_messages
    /// [`Error::OutboxFull`]: ./enum.Error.html#variant.OutboxFull
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<()> {
        let exchange = self.inner.schema.resolve_exchange(exchange, None)?;
        let message = Message {
            exchange: exchange.name.clone(),
            routing_key: routing_key.into(),
            payload,
            properties,
        };
        let Some(pending) = self
            .inner
            .outbox
            .push_unless_ready(Pending { exchange, message })?
        else {
            trace!(routing_key, "Not ready, queued message.");
            return Ok(());
        };
        let provisioner = match self.session() {
            Some(session) => session.provisioner().await,
            None => Err(Error::NotConnected),
        };
        match provisioner {
            Ok(provisioner) => {
                provisioner
                    .publish(&pending.exchange, &pending.message)
                    .await
            }
            Err(Error::ChannelUnavailable | Error::NotConnected) => {
                trace!(routing_key, "Connection went away, queued message.");
                self.inner.outbox.push(pending)
            }
            Err(error) => Err(error),
        }
    }

    /// Consume the queue registered as `logical_queue` in the schema, now if connected and
    /// again after every reconnection.
    ///
    /// A delivery is acked once `handler` returns `Ok`, and rejected without requeueing if it
    /// fails, in which case the error is also reported to the error handler.
    ///
    /// A queue the schema can't resolve is an error right away, and nothing is registered.
    pub async fn listen<H>(
        &self,
        logical_queue: &str,
        replacements: Option<Replacements>,
        handler: H,
    ) -> Result<()>
    where
        H: Fn(&Delivery) -> HookResult + Send + Sync + 'static,
    {
        self.inner
            .schema
            .resolve_queue(logical_queue, replacements.as_ref())?;
        let listener = Listener::new(logical_queue, replacements, Arc::new(handler));
        self.inner.listeners.register(listener.clone());
        match self.session() {
            Some(session) if self.phase().has_channel() => {
                listener
                    .start(&session, &*self.inner.runtime, &self.inner.error_handler)
                    .await
            }
            _ => Ok(()),
        }
    }

    /// The session of the current (or last) attempt.
    pub fn session(&self) -> Option<ProtocolSession> {
        self.inner.session.lock().clone()
    }

    /// The open channel of the current session.
    pub fn channel(&self) -> Result<Arc<dyn ProtocolChannel>> {
        self.session().ok_or(Error::NotConnected)?.channel()
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.inner.status
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.inner.status.phase()
    }

    /// Identifier of the current (or last) attempt, starting at 1.
    pub fn attempt(&self) -> u64 {
        self.inner.status.attempt()
    }

    pub fn backoff(&self) -> Backoff {
        self.inner.backoff.lock().clone()
    }

    /// Messages waiting for the connection to be ready.
    pub fn queued_messages(&self) -> usize {
        self.inner.outbox.len()
    }
}

impl fmt::Debug for ReconnectingFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingFactory")
            .field("info", &self.inner.info)
            .field("status", &self.inner.status)
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}
