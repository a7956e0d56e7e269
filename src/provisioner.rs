use crate::{
    registry::Registry,
    schema::{ExchangeDeclaration, QueueDeclaration, Replacements, SchemaProvider},
    transport::{Message, ProtocolChannel},
    Result,
};
use std::{fmt, sync::Arc};
use tracing::trace;

/// Declares queues and exchanges described by a [`SchemaProvider`] on an open channel.
///
/// Declarations are resolved on every call; exchanges and bindings are only issued once
/// per session.
///
/// [`SchemaProvider`]: ./trait.SchemaProvider.html
#[derive(Clone)]
pub struct QueueProvisioner {
    channel: Arc<dyn ProtocolChannel>,
    schema: Arc<dyn SchemaProvider>,
    registry: Registry,
}

impl QueueProvisioner {
    pub(crate) fn new(
        channel: Arc<dyn ProtocolChannel>,
        schema: Arc<dyn SchemaProvider>,
        registry: Registry,
    ) -> Self {
        Self {
            channel,
            schema,
            registry,
        }
    }

    /// Declare the queue registered as `logical_name`, its exchanges and its bindings.
    pub async fn create_queue(
        &self,
        logical_name: &str,
        replacements: Option<&Replacements>,
    ) -> Result<QueueDeclaration> {
        let queue = self.schema.resolve_queue(logical_name, replacements)?;
        trace!(logical_name, queue = %queue.name, "Declaring queue.");
        self.channel.queue_declare(&queue).await?;
        for binding in &queue.bindings {
            self.declare_exchange(&binding.exchange).await?;
            if self.registry.binding_declared(
                &queue.name,
                &binding.exchange.name,
                &binding.routing_key,
            ) {
                continue;
            }
            trace!(
                queue = %queue.name,
                exchange = %binding.exchange.name,
                routing_key = %binding.routing_key,
                "Binding queue.",
            );
            self.channel
                .queue_bind(
                    &queue.name,
                    &binding.exchange.name,
                    &binding.routing_key,
                    &binding.arguments,
                )
                .await?;
            self.registry.register_binding(
                &queue.name,
                &binding.exchange.name,
                &binding.routing_key,
            );
        }
        self.registry.register_queue(&queue);
        Ok(queue)
    }

    /// Declare the exchange unless this session already did.
    pub async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<()> {
        if self.registry.exchange_declared(exchange) {
            return Ok(());
        }
        trace!(exchange = %exchange.name, kind = %exchange.kind, "Declaring exchange.");
        self.channel.exchange_declare(exchange).await?;
        self.registry.register_exchange(exchange);
        Ok(())
    }

    pub(crate) fn channel(&self) -> &Arc<dyn ProtocolChannel> {
        &self.channel
    }

    pub(crate) async fn publish(
        &self,
        exchange: &ExchangeDeclaration,
        message: &Message,
    ) -> Result<()> {
        self.declare_exchange(exchange).await?;
        self.channel.basic_publish(message).await
    }
}

impl fmt::Debug for QueueProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProvisioner")
            .field("declared_queues", &self.registry.queues())
            .finish()
    }
}
