use crate::{
    schema::{ExchangeDeclaration, QueueDeclaration},
    transport::{Delivery, Message, ProtocolChannel, ProtocolClient, Transport},
    types::{FieldTable, LongString},
    ConnectionInfo, Error, Result,
};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use lapin::{
    message::DeliveryResult,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    Channel, Connection, ConnectionProperties,
};
use std::{io, sync::Arc};
use tracing::trace;

const REPLY_SUCCESS: u16 = 200;

/// Connects through lapin.
///
/// lapin negotiates the protocol and authenticates as part of opening the connection, so
/// rejected credentials are reported by [`Transport::connect`] already.
///
/// [`Transport::connect`]: ./trait.Transport.html#tymethod.connect
#[derive(Clone, Default)]
pub struct LapinTransport {
    properties: ConnectionProperties,
}

impl LapinTransport {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }

    #[must_use]
    pub fn with_connection_name(mut self, name: &str) -> Self {
        self.properties = self
            .properties
            .with_connection_name(LongString::from(name.to_owned()));
        self
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn connect(&self, info: &ConnectionInfo) -> Result<Box<dyn ProtocolClient>> {
        let connection = Connection::connect_uri(info.to_uri(), self.properties.clone()).await?;
        let (sender, closed) = flume::bounded(1);
        let on_error = sender.clone();
        connection.on_error(move |error| {
            trace!(%error, "Connection error.");
            let _ = on_error.try_send(error.into());
        });
        Ok(Box::new(LapinClient {
            connection,
            sender,
            closed,
        }))
    }
}

struct LapinClient {
    connection: Connection,
    sender: Sender<Error>,
    closed: Receiver<Error>,
}

#[async_trait]
impl ProtocolClient for LapinClient {
    async fn authenticate(&self, _info: &ConnectionInfo) -> Result<()> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(Error::connection_closed("connection closed during handshake"))
        }
    }

    async fn open_channel(&self) -> Result<Arc<dyn ProtocolChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Arc::new(LapinChannel { channel }))
    }

    async fn closed(&self) -> Error {
        self.closed
            .recv_async()
            .await
            .unwrap_or_else(|_| Error::connection_closed("connection dropped"))
    }

    async fn close(&self) -> Result<()> {
        let _ = self
            .sender
            .try_send(Error::connection_closed("connection closed by the client"));
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }
}

struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl ProtocolChannel for LapinChannel {
    async fn exchange_declare(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                (&exchange.kind).into(),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                exchange.arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn queue_declare(&self, queue: &QueueDeclaration) -> Result<()> {
        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                queue.arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                arguments.clone(),
            )
            .await?;
        Ok(())
    }

    async fn basic_publish(&self, message: &Message) -> Result<()> {
        self.channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                message.properties.clone(),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn basic_consume(&self, queue: &str, consumer_tag: &str) -> Result<Receiver<Delivery>> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let (sender, deliveries) = flume::unbounded();
        consumer.set_delegate(move |delivery: DeliveryResult| {
            let sender = sender.clone();
            async move {
                match delivery {
                    Ok(Some(delivery)) => {
                        let _ = sender.send_async(delivery.into()).await;
                    }
                    Ok(None) => trace!("Consumer canceled."),
                    Err(error) => trace!(%error, "Consumer failed."),
                }
            }
        });
        Ok(deliveries)
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(REPLY_SUCCESS, "OK").await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
        }
    }
}

impl From<lapin::Error> for Error {
    fn from(other: lapin::Error) -> Self {
        match other {
            lapin::Error::IOError(error) => Error::TransportError(error),
            lapin::Error::ProtocolError(error) => error.into(),
            other => io::Error::other(other.to_string()).into(),
        }
    }
}
