#![warn(rust_2018_idioms)]

//! lapin-reconnect
//!
//! A self-healing connection to an AMQP broker, targeting especially RabbitMQ.
//!
//! The main access point is the [`ReconnectingFactory`], which keeps one logical connection
//! alive across network failures, rejected credentials and broker restarts, retrying with
//! an exponential backoff. Each connection attempt goes through the same lifecycle
//! checkpoints, which can be awaited as [`LifecycleSignal`]s or subscribed to:
//!
//! * `on_connection_made`: the transport is up
//! * `on_authenticated`: credentials were accepted and a channel is open
//! * `on_initial_send`: messages published while disconnected were sent
//! * `on_connection_lost`: an established connection went away
//! * `on_connection_failed`: an attempt failed before completing its handshake
//!
//! Queues and exchanges are referred to by logical names, resolved through a
//! [`SchemaProvider`] and declared on demand by the [`QueueProvisioner`].
//!
//! ## Feature switches
//!
//! * `lapin` (*default*): connect to the broker through lapin
//! * `default-runtime` (*default*): spawn onto async-global-executor and use async-io timers
//!
//! ## Example
//!
//! ```rust,no_run
//! use lapin_reconnect::{
//!     BasicProperties, ConnectionInfo, ExchangeDefinition, ExchangeKind, Phase,
//!     QueueDefinition, QueueSchema, ReconnectConfig, ReconnectingFactory, Result,
//! };
//! use std::time::Duration;
//! use tracing::info;
//!
//! fn main() -> Result<()> {
//!     let _ = tracing_subscriber::fmt::try_init();
//!
//!     let schema = QueueSchema::default()
//!         .with_exchange("$Events", ExchangeDefinition::new("zenoss.events", ExchangeKind::Topic))
//!         .with_queue(
//!             "$TestQueue",
//!             QueueDefinition::new("zenoss.queues.test").with_binding("$Events", "zenoss.#"),
//!         );
//!     let factory = ReconnectingFactory::builder(
//!         ConnectionInfo::default().with_vhost("/zenoss"),
//!     )
//!     .with_schema(schema)
//!     .with_reconnect_config(ReconnectConfig::default().with_max_delay(Duration::from_secs(30)))
//!     .build()?;
//!
//!     factory.subscribe(Phase::ConnectionLost, |event| {
//!         info!(attempt = event.attempt(), "Lost connection, will retry.");
//!         Ok(())
//!     });
//!
//!     async_global_executor::block_on(async {
//!         factory.connect()?;
//!         factory.on_initial_send().await?;
//!
//!         let queue = factory.create_queue("$TestQueue", None).await?;
//!         info!(queue = %queue.name, "Declared queue.");
//!
//!         factory
//!             .publish("$Events", "zenoss.test", b"Hello world!".to_vec(), BasicProperties::default())
//!             .await?;
//!
//!         factory.shutdown().await
//!     })
//! }
//! ```
//! [`ReconnectingFactory`]: ./struct.ReconnectingFactory.html
//! [`LifecycleSignal`]: ./struct.LifecycleSignal.html
//! [`SchemaProvider`]: ./trait.SchemaProvider.html
//! [`QueueProvisioner`]: ./struct.QueueProvisioner.html

pub use amq_protocol::{
    protocol::{self, BasicProperties},
    types, uri,
};

pub use backoff::Backoff;
pub use connection_info::ConnectionInfo;
pub use connection_status::{ConnectionStatus, LifecyclePhase};
pub use error::{Error, Result};
pub use events::Event;
pub use exchange::ExchangeKind;
pub use factory::{FactoryBuilder, ReconnectingFactory};
pub use hooks::{HookResult, Phase, PhaseEvent};
#[cfg(feature = "lapin")]
pub use lapin_transport::LapinTransport;
pub use provisioner::QueueProvisioner;
pub use reconnect_config::ReconnectConfig;
pub use schema::{
    ArgumentValue, Binding, BindingDefinition, ExchangeDeclaration, ExchangeDefinition,
    QueueDeclaration, QueueDefinition, QueueSchema, Replacements, SchemaProvider,
};
pub use session::ProtocolSession;
pub use signal::LifecycleSignal;
pub use transport::{Delivery, Message, ProtocolChannel, ProtocolClient, Transport};

pub mod runtime;

mod backoff;
mod connection_info;
mod connection_status;
mod error;
mod error_handler;
mod events;
mod exchange;
mod factory;
mod hooks;
#[cfg(feature = "lapin")]
mod lapin_transport;
mod listeners;
mod notifier;
mod outbox;
mod provisioner;
mod reconnect_config;
mod registry;
mod schema;
mod session;
mod signal;
mod transport;
