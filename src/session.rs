use crate::{
    connection_status::{ConnectionStatus, LifecyclePhase},
    hooks::{Hooks, Phase, PhaseEvent},
    provisioner::QueueProvisioner,
    registry::Registry,
    schema::SchemaProvider,
    transport::{ProtocolChannel, ProtocolClient, Transport},
    ConnectionInfo, Error, Result,
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

/// One connection attempt: its protocol client, its channel and what was declared on it.
///
/// A session fires the lifecycle signals of its attempt in order, `ConnectionMade`,
/// `Authenticated`, then `InitialSend`, and at most one of `ConnectionLost` or
/// `ConnectionFailed`. Once that terminal signal fired, the channel is released and
/// [`channel`] never returns it again.
///
/// [`channel`]: #method.channel
#[derive(Clone)]
pub struct ProtocolSession {
    inner: Arc<Inner>,
}

struct Inner {
    attempt: u64,
    info: ConnectionInfo,
    hooks: Hooks,
    status: ConnectionStatus,
    schema: Arc<dyn SchemaProvider>,
    client: Mutex<Option<Arc<dyn ProtocolClient>>>,
    channel: Mutex<Option<Arc<dyn ProtocolChannel>>>,
    registry: Registry,
    ended: AtomicBool,
    closing: AtomicBool,
}

impl ProtocolSession {
    pub(crate) fn new(
        attempt: u64,
        info: ConnectionInfo,
        hooks: Hooks,
        status: ConnectionStatus,
        schema: Arc<dyn SchemaProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                attempt,
                info,
                hooks,
                status,
                schema,
                client: Mutex::new(None),
                channel: Mutex::new(None),
                registry: Registry::default(),
                ended: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn attempt(&self) -> u64 {
        self.inner.attempt
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// Whether this attempt already ended, either lost, failed or closed.
    pub fn is_terminated(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst) || self.inner.closing.load(Ordering::SeqCst)
    }

    /// Connect, authenticate and open a channel, firing `ConnectionMade` then
    /// `Authenticated`. Any failure is returned as is, retrying is up to the caller.
    pub(crate) async fn establish(&self, transport: &dyn Transport) -> Result<()> {
        let info = &self.inner.info;
        self.set_phase(LifecyclePhase::Connecting);
        debug!(
            attempt = self.attempt(),
            host = %info.host(),
            port = info.port(),
            vhost = %info.vhost(),
            "Connecting to the broker.",
        );
        let client: Arc<dyn ProtocolClient> = transport.connect(info).await?.into();
        *self.inner.client.lock() = Some(client.clone());
        self.ensure_alive()?;
        self.set_phase(LifecyclePhase::Connected);
        self.fire(PhaseEvent::new(self.attempt(), Phase::ConnectionMade));

        self.set_phase(LifecyclePhase::Authenticating);
        client.authenticate(info).await?;
        self.ensure_alive()?;
        let channel = client.open_channel().await?;
        *self.inner.channel.lock() = Some(channel.clone());
        self.ensure_alive()?;
        self.set_phase(LifecyclePhase::Authenticated);
        debug!(attempt = self.attempt(), "Authenticated, channel is open.");
        self.fire(PhaseEvent::new(self.attempt(), Phase::Authenticated).with_channel(channel));
        Ok(())
    }

    /// Everything queued while disconnected was sent: the session is ready.
    pub(crate) fn initial_send_done(&self) -> Result<()> {
        self.ensure_alive()?;
        let channel = self.channel()?;
        self.set_phase(LifecyclePhase::Ready);
        self.fire(PhaseEvent::new(self.attempt(), Phase::InitialSend).with_channel(channel));
        Ok(())
    }

    /// The open channel, or [`Error::ChannelUnavailable`] before authentication completes
    /// and after the session ended.
    ///
    /// [`Error::ChannelUnavailable`]: ./enum.Error.html#variant.ChannelUnavailable
    pub fn channel(&self) -> Result<Arc<dyn ProtocolChannel>> {
        match &*self.inner.channel.lock() {
            Some(channel) if channel.is_open() => Ok(channel.clone()),
            _ => Err(Error::ChannelUnavailable),
        }
    }

    /// A provisioner on the session's channel. If the broker closed the channel (which it
    /// does on a failed declaration) while the connection is still up, a new one is opened.
    pub async fn provisioner(&self) -> Result<QueueProvisioner> {
        let current = self.inner.channel.lock().clone();
        let channel = match current {
            Some(channel) if channel.is_open() => channel,
            Some(_) => self.reopen_channel().await?,
            None => return Err(Error::ChannelUnavailable),
        };
        Ok(QueueProvisioner::new(
            channel,
            self.inner.schema.clone(),
            self.inner.registry.clone(),
        ))
    }

    async fn reopen_channel(&self) -> Result<Arc<dyn ProtocolChannel>> {
        if self.is_terminated() {
            return Err(Error::ChannelUnavailable);
        }
        let client = self
            .inner
            .client
            .lock()
            .clone()
            .ok_or(Error::ChannelUnavailable)?;
        trace!(attempt = self.attempt(), "Reopening closed channel.");
        let channel = client.open_channel().await?;
        if self.is_terminated() {
            let _ = channel.close().await;
            return Err(Error::ChannelUnavailable);
        }
        *self.inner.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    /// Queues declared on this session, sorted by name.
    pub fn declared_queues(&self) -> Vec<String> {
        self.inner.registry.queues()
    }

    /// A connection that got past its handshake went away. Returns false if this attempt
    /// already ended.
    pub(crate) fn connection_lost(&self, error: Error) -> bool {
        self.end(Phase::ConnectionLost, LifecyclePhase::Disconnected, error)
    }

    /// The handshake of this attempt failed. Returns false if this attempt already ended.
    pub(crate) fn connection_failed(&self, error: Error) -> bool {
        self.end(Phase::ConnectionFailed, LifecyclePhase::Failed, error)
    }

    fn end(&self, hook: Phase, phase: LifecyclePhase, error: Error) -> bool {
        if self.inner.ended.swap(true, Ordering::SeqCst) {
            trace!(attempt = self.attempt(), %hook, "Session already ended.");
            return false;
        }
        self.release();
        self.set_phase(phase);
        self.inner
            .hooks
            .fire(PhaseEvent::new(self.attempt(), hook).with_error(error));
        true
    }

    /// Drop the channel handle; the session will no longer hand it out.
    pub(crate) fn release(&self) -> Option<Arc<dyn ProtocolChannel>> {
        self.inner.channel.lock().take()
    }

    /// Resolves with the reason once the protocol client reports the connection gone.
    pub(crate) async fn closed(&self) -> Error {
        let client = self.inner.client.lock().clone();
        match client {
            Some(client) => client.closed().await,
            None => Error::NotConnected,
        }
    }

    /// Close the channel and the protocol client. An ongoing handshake is aborted; a ready
    /// connection is reported lost, and the factory reconnects.
    pub async fn close(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::SeqCst);
        let channel = self.release();
        let client = self.inner.client.lock().take();
        if let Some(channel) = channel.filter(|channel| channel.is_open()) {
            if let Err(error) = channel.close().await {
                trace!(attempt = self.attempt(), %error, "Failed to close channel.");
            }
        }
        match client {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_terminated() {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        self.inner.status.set_phase(self.attempt(), phase);
    }

    fn fire(&self, event: PhaseEvent) {
        if !self.is_terminated() {
            self.inner.hooks.fire(event);
        }
    }
}

impl fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("attempt", &self.inner.attempt)
            .field("info", &self.inner.info)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
