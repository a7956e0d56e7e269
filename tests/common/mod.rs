#![allow(dead_code)]

use async_trait::async_trait;
use flume::{Receiver, Sender};
use futures_lite::future;
use lapin_reconnect::{
    runtime::{BoxFuture, Runtime},
    types::FieldTable,
    ConnectionInfo, Delivery, Error, ExchangeDeclaration, ExchangeDefinition, ExchangeKind,
    Message, ProtocolChannel, ProtocolClient, QueueDeclaration, QueueDefinition, QueueSchema,
    Result, Transport,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

pub fn schema() -> QueueSchema {
    QueueSchema::default()
        .with_exchange(
            "$Events",
            ExchangeDefinition::new("zenoss.events", ExchangeKind::Topic),
        )
        .with_exchange(
            "$Raw",
            ExchangeDefinition::new("zenoss.{tenant}.raw", ExchangeKind::Fanout),
        )
        .with_queue(
            "$TestQueue",
            QueueDefinition::new("zenoss.queues.test").with_binding("$Events", "zenoss.#"),
        )
        .with_queue(
            "$TenantQueue",
            QueueDefinition::new("zenoss.queues.{tenant}")
                .with_binding("$Raw", "")
                .with_binding("$Events", "zenoss.{tenant}.#"),
        )
        .with_queue("$Transient", {
            let mut queue = QueueDefinition::new("zenoss.queues.test");
            queue.durable = false;
            queue
        })
}

/// A scripted in-memory broker.
#[derive(Clone, Default)]
pub struct MockBroker(Arc<Mutex<BrokerState>>);

#[derive(Default)]
pub struct BrokerState {
    pub connect_failures: u32,
    pub auth_failures: u32,
    pub hold_auth: bool,
    pub connections: Vec<ConnectionInfo>,
    pub clients_closed: u32,
    pub channels_opened: u32,
    pub queues: HashMap<String, QueueDeclaration>,
    pub exchanges: HashMap<String, ExchangeDeclaration>,
    pub queue_declarations: Vec<String>,
    pub exchange_declarations: Vec<String>,
    pub bindings: Vec<(String, String, String)>,
    pub published: Vec<Message>,
    pub acks: Vec<u64>,
    pub rejects: Vec<u64>,
    consumers: Vec<(String, Sender<Delivery>)>,
    links: Vec<(Sender<Error>, Arc<AtomicBool>)>,
    delivery_tag: u64,
}

impl MockBroker {
    #[must_use]
    pub fn fail_connects(self, count: u32) -> Self {
        self.0.lock().connect_failures = count;
        self
    }

    #[must_use]
    pub fn fail_auths(self, count: u32) -> Self {
        self.0.lock().auth_failures = count;
        self
    }

    /// Authentication never completes from now on.
    pub fn hold_auth(&self) {
        self.0.lock().hold_auth = true;
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, BrokerState> {
        self.0.lock()
    }

    /// Kill every open connection, as a broker restart would.
    pub fn drop_connections(&self) {
        let links = std::mem::take(&mut self.0.lock().links);
        for (sender, open) in links {
            open.store(false, Ordering::SeqCst);
            let _ = sender.try_send(io::Error::from(io::ErrorKind::ConnectionReset).into());
        }
        self.0.lock().consumers.clear();
    }

    pub fn consumers(&self, queue: &str) -> usize {
        self.0
            .lock()
            .consumers
            .iter()
            .filter(|(q, _)| q == queue)
            .count()
    }

    /// Deliver to the most recent consumer of `queue`; returns its delivery tag.
    pub fn deliver(&self, queue: &str, data: &[u8]) -> u64 {
        let mut state = self.0.lock();
        state.delivery_tag += 1;
        let delivery_tag = state.delivery_tag;
        let (_, consumer) = state
            .consumers
            .iter()
            .rev()
            .find(|(q, _)| q == queue)
            .expect("no consumer for queue");
        consumer
            .send(Delivery {
                delivery_tag,
                exchange: "zenoss.events".into(),
                routing_key: "zenoss.test".into(),
                redelivered: false,
                properties: Default::default(),
                data: data.to_vec(),
            })
            .expect("consumer went away");
        delivery_tag
    }
}

#[async_trait]
impl Transport for MockBroker {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ProtocolClient>> {
        let mut state = self.0.lock();
        state.connections.push(info.clone());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        let (sender, closed) = flume::bounded(1);
        let open = Arc::new(AtomicBool::new(true));
        state.links.push((sender.clone(), open.clone()));
        Ok(Box::new(MockClient {
            broker: self.clone(),
            sender,
            closed,
            open,
        }))
    }
}

struct MockClient {
    broker: MockBroker,
    sender: Sender<Error>,
    closed: Receiver<Error>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn authenticate(&self, _info: &ConnectionInfo) -> Result<()> {
        let held = {
            let mut state = self.broker.0.lock();
            if state.auth_failures > 0 {
                state.auth_failures -= 1;
                return Err(Error::Authentication("ACCESS_REFUSED".into()));
            }
            state.hold_auth
        };
        if held {
            future::pending::<()>().await;
        }
        Ok(())
    }

    async fn open_channel(&self) -> Result<Arc<dyn ProtocolChannel>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
        }
        self.broker.0.lock().channels_opened += 1;
        Ok(Arc::new(MockChannel {
            broker: self.broker.clone(),
            connection: self.open.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }

    async fn closed(&self) -> Error {
        match self.closed.recv_async().await {
            Ok(error) => error,
            Err(_) => io::Error::from(io::ErrorKind::ConnectionAborted).into(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let _ = self
            .sender
            .try_send(io::Error::from(io::ErrorKind::ConnectionAborted).into());
        self.broker.0.lock().clients_closed += 1;
        Ok(())
    }
}

struct MockChannel {
    broker: MockBroker,
    connection: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
}

impl MockChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected).into())
        }
    }

    /// The broker closes the channel on a failed precondition.
    fn conflict(&self, what: &str) -> Error {
        self.open.store(false, Ordering::SeqCst);
        Error::ConflictingDeclaration(format!("PRECONDITION_FAILED - inequivalent {}", what))
    }
}

#[async_trait]
impl ProtocolChannel for MockChannel {
    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.0.lock();
        state.exchange_declarations.push(exchange.name.clone());
        match state.exchanges.get(&exchange.name) {
            Some(existing) if existing != exchange => {
                return Err(self.conflict(&exchange.name));
            }
            _ => {}
        }
        state
            .exchanges
            .insert(exchange.name.clone(), exchange.clone());
        Ok(())
    }

    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.broker.0.lock();
        state.queue_declarations.push(queue.name.clone());
        match state.queues.get(&queue.name) {
            Some(existing)
                if (existing.durable, existing.exclusive, existing.auto_delete)
                    != (queue.durable, queue.exclusive, queue.auto_delete) =>
            {
                return Err(self.conflict(&queue.name));
            }
            _ => {}
        }
        state.queues.insert(queue.name.clone(), queue.clone());
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: &FieldTable,
    ) -> Result<()> {
        self.ensure_open()?;
        self.broker
            .0
            .lock()
            .bindings
            .push((queue.into(), exchange.into(), routing_key.into()));
        Ok(())
    }

    async fn basic_publish(&self, message: &Message) -> Result<()> {
        self.ensure_open()?;
        self.broker.0.lock().published.push(message.clone());
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, _consumer_tag: &str) -> Result<Receiver<Delivery>> {
        self.ensure_open()?;
        let (sender, receiver) = flume::unbounded();
        self.broker.0.lock().consumers.push((queue.into(), sender));
        Ok(receiver)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.ensure_open()?;
        self.broker.0.lock().acks.push(delivery_tag);
        Ok(())
    }

    async fn basic_reject(&self, delivery_tag: u64, _requeue: bool) -> Result<()> {
        self.ensure_open()?;
        self.broker.0.lock().rejects.push(delivery_tag);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection.load(Ordering::SeqCst)
    }
}

/// A runtime whose sleeps only end when the test advances time.
#[derive(Clone, Debug)]
pub struct VirtualClock(Arc<Mutex<ClockState>>, Receiver<Duration>);

#[derive(Debug)]
struct ClockState {
    now: Duration,
    sleepers: Vec<(Duration, Sender<()>)>,
    requested: Vec<Duration>,
    requests: Sender<Duration>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        let (requests, receiver) = flume::unbounded();
        Self(
            Arc::new(Mutex::new(ClockState {
                now: Duration::ZERO,
                sleepers: Vec::new(),
                requested: Vec::new(),
                requests,
            })),
            receiver,
        )
    }
}

impl VirtualClock {
    /// Wait for the next sleep to be requested.
    pub async fn next_sleep(&self) -> Duration {
        self.1.recv_async().await.expect("clock dropped")
    }

    /// Every delay requested so far.
    pub fn requested(&self) -> Vec<Duration> {
        self.0.lock().requested.clone()
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.0.lock();
        state.now += by;
        let now = state.now;
        state.sleepers.retain(|(deadline, waker)| {
            if *deadline <= now {
                let _ = waker.send(());
                false
            } else {
                true
            }
        });
    }
}

impl Runtime for VirtualClock {
    fn spawn(&self, f: BoxFuture<()>) {
        async_global_executor::spawn(f).detach();
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<()> {
        let (sender, receiver) = flume::bounded(1);
        {
            let mut state = self.0.lock();
            let deadline = state.now + delay;
            state.sleepers.push((deadline, sender));
            state.requested.push(delay);
            let _ = state.requests.send(delay);
        }
        Box::pin(async move {
            let _ = receiver.recv_async().await;
        })
    }
}

/// Poll `condition` until it holds, giving spawned tasks the time to run.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        future::yield_now().await;
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("condition never became true");
}
