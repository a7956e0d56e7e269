use futures_lite::StreamExt;
use lapin_reconnect::{
    BasicProperties, ConnectionInfo, Event, ExchangeDefinition, ExchangeKind, Phase,
    QueueDefinition, QueueSchema, ReconnectConfig, ReconnectingFactory, Result,
};
use std::time::Duration;
use tracing::{info, warn};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let info: ConnectionInfo = std::env::var("AMQP_ADDR")
        .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".into())
        .parse()?;
    let schema = QueueSchema::default()
        .with_exchange(
            "$Events",
            ExchangeDefinition::new("zenoss.events", ExchangeKind::Topic),
        )
        .with_queue(
            "$TestQueue",
            QueueDefinition::new("zenoss.queues.test").with_binding("$Events", "zenoss.#"),
        );
    let factory = ReconnectingFactory::builder(info)
        .with_schema(schema)
        .with_reconnect_config(ReconnectConfig::default().with_max_delay(Duration::from_secs(30)))
        .build()?;

    factory.subscribe(Phase::ConnectionLost, |event| {
        warn!(attempt = event.attempt(), error = ?event.error(), "Lost connection.");
        Ok(())
    });
    factory.on_error(|error| warn!(%error, "Unhandled error."));

    let mut events = factory.events();
    async_global_executor::spawn(async move {
        while let Some(event) = events.next().await {
            if let Event::RetryScheduled { attempt, delay } = event {
                info!(attempt, ?delay, "Retrying.");
            }
        }
    })
    .detach();

    async_global_executor::block_on(async {
        factory
            .listen("$TestQueue", None, |delivery| {
                info!(
                    routing_key = %delivery.routing_key,
                    payload = %String::from_utf8_lossy(&delivery.data),
                    "Received message.",
                );
                Ok(())
            })
            .await?;
        factory.connect()?;

        loop {
            // Keeps queueing while the broker is away, flushed once it is back.
            factory
                .publish(
                    "$Events",
                    "zenoss.demo",
                    b"Hello world!".to_vec(),
                    BasicProperties::default(),
                )
                .await?;
            async_io::Timer::after(Duration::from_secs(1)).await;
        }
    })
}
