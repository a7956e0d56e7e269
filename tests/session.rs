mod common;

use common::{eventually, schema, MockBroker, VirtualClock};
use lapin_reconnect::{
    ConnectionInfo, Error, LifecyclePhase, ReconnectingFactory, Replacements,
};
use std::{io, time::Duration};

fn factory(broker: &MockBroker, clock: &VirtualClock) -> ReconnectingFactory {
    ReconnectingFactory::builder(ConnectionInfo::default().with_vhost("/zenoss"))
        .with_transport(broker.clone())
        .with_runtime(clock.clone())
        .with_schema(schema())
        .build()
        .unwrap()
}

#[test]
fn session_releases_its_channel_once_lost() {
    let _ = tracing_subscriber::fmt::try_init();
    async_global_executor::block_on(async {
        let broker = MockBroker::default();
        let clock = VirtualClock::default();
        let factory = factory(&broker, &clock);
        assert!(factory.session().is_none());
        assert_eq!(factory.channel().err(), Some(Error::NotConnected));

        let ready = factory.on_initial_send();
        factory.connect().unwrap();
        ready.await.unwrap();

        let session = factory.session().unwrap();
        assert_eq!(session.attempt(), 1);
        assert_eq!(session.connection_info().vhost(), "/zenoss");
        assert!(session.channel().is_ok());
        assert!(!session.is_terminated());

        let lost = factory.on_connection_lost();
        let ready = factory.on_initial_send();
        broker.drop_connections();
        let event = lost.await.unwrap();
        assert_eq!(event.attempt(), 1);
        assert!(event.error().unwrap().is_transport_error());
        assert_eq!(session.channel().err(), Some(Error::ChannelUnavailable));
        assert!(session.is_terminated());
        eventually(|| broker.state().clients_closed == 1).await;

        clock.advance(clock.next_sleep().await);
        ready.await.unwrap();
        let current = factory.session().unwrap();
        assert_eq!(current.attempt(), 2);
        assert!(current.channel().is_ok());
        assert_eq!(session.channel().err(), Some(Error::ChannelUnavailable));

        factory.shutdown().await.unwrap();
    });
}

#[test]
fn closing_a_ready_session_reconnects() {
    let _ = tracing_subscriber::fmt::try_init();
    async_global_executor::block_on(async {
        let broker = MockBroker::default();
        let clock = VirtualClock::default();
        let factory = factory(&broker, &clock);
        let ready = factory.on_initial_send();
        factory.connect().unwrap();
        ready.await.unwrap();

        let lost = factory.on_connection_lost();
        let ready = factory.on_initial_send();
        let session = factory.session().unwrap();
        session.close().await.unwrap();
        assert!(session.is_terminated());
        assert_eq!(session.channel().err(), Some(Error::ChannelUnavailable));
        assert_eq!(broker.state().clients_closed, 1);

        let event = lost.await.unwrap();
        assert_eq!(event.attempt(), 1);
        assert_eq!(
            event.error(),
            Some(&Error::from(io::Error::from(io::ErrorKind::ConnectionAborted)))
        );
        assert_eq!(clock.next_sleep().await, Duration::from_secs(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(ready.await.unwrap().attempt(), 2);
        assert_eq!(broker.state().clients_closed, 1);

        factory.shutdown().await.unwrap();
        assert_eq!(broker.state().clients_closed, 2);
        assert_eq!(factory.phase(), LifecyclePhase::Disconnected);
    });
}

#[test]
fn declared_queues_belong_to_their_session() {
    let _ = tracing_subscriber::fmt::try_init();
    async_global_executor::block_on(async {
        let broker = MockBroker::default();
        let clock = VirtualClock::default();
        let factory = factory(&broker, &clock);
        let ready = factory.on_initial_send();
        factory.connect().unwrap();
        ready.await.unwrap();

        let session = factory.session().unwrap();
        assert!(session.declared_queues().is_empty());
        let replacements: Replacements = [("tenant".to_owned(), "acme".to_owned())].into();
        factory
            .create_queue("$TenantQueue", Some(&replacements))
            .await
            .unwrap();
        factory.create_queue("$TestQueue", None).await.unwrap();
        assert_eq!(
            session.declared_queues(),
            vec!["zenoss.queues.acme", "zenoss.queues.test"]
        );

        let ready = factory.on_initial_send();
        broker.drop_connections();
        clock.advance(clock.next_sleep().await);
        ready.await.unwrap();
        assert!(factory.session().unwrap().declared_queues().is_empty());
        assert_eq!(session.declared_queues().len(), 2);

        factory.shutdown().await.unwrap();
    });
}
