use crate::{
    schema::{ExchangeDeclaration, QueueDeclaration},
    types::FieldTable,
    BasicProperties, ConnectionInfo, Error, Result,
};
use async_trait::async_trait;
use flume::Receiver;
use std::sync::Arc;

/// Opens connections to the broker.
///
/// A transport failure is reported as [`Error::TransportError`], rejected credentials as
/// [`Error::Authentication`].
///
/// [`Error::TransportError`]: ./enum.Error.html#variant.TransportError
/// [`Error::Authentication`]: ./enum.Error.html#variant.Authentication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ProtocolClient>>;
}

/// One established connection to the broker.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Protocol negotiation, credentials and vhost selection.
    async fn authenticate(&self, info: &ConnectionInfo) -> Result<()>;
    async fn open_channel(&self) -> Result<Arc<dyn ProtocolChannel>>;
    /// Resolves with the reason once the connection is gone.
    async fn closed(&self) -> Error;
    async fn close(&self) -> Result<()>;
}

/// A channel multiplexed over a [`ProtocolClient`], serializing the operations issued on it.
///
/// [`ProtocolClient`]: ./trait.ProtocolClient.html
#[async_trait]
pub trait ProtocolChannel: Send + Sync {
    /// Redeclaring an exchange with identical parameters succeeds.
    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()>;
    /// Redeclaring a queue with identical parameters succeeds.
    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()>;
    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()>;
    async fn basic_publish(&self, message: &Message) -> Result<()>;
    /// Start consuming `queue`; deliveries are sent on the returned receiver until the
    /// consumer or the channel goes away.
    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<Receiver<Delivery>>;
    async fn basic_ack(&self, delivery_tag: u64) -> Result<()>;
    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool {
        true
    }
}

/// An outgoing message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

impl Message {
    pub fn new(exchange: &str, routing_key: &str, payload: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload,
            properties: BasicProperties::default(),
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// A received AMQP message.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message, used to acknowledge it.
    pub delivery_tag: u64,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: String,

    pub routing_key: String,

    pub redelivered: bool,

    pub properties: BasicProperties,

    pub data: Vec<u8>,
}
