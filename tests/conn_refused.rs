#![cfg(all(feature = "lapin", feature = "default-runtime"))]

use lapin_reconnect::{
    ConnectionInfo, Error, LifecyclePhase, ReconnectConfig, ReconnectingFactory,
};
use std::io;

#[test]
fn connection_refused() {
    let _ = tracing_subscriber::fmt::try_init();
    async_global_executor::block_on(async {
        let info = ConnectionInfo::default()
            .with_host("127.0.0.1")
            .with_port(5673)
            .with_credentials("demo", "demo");
        let factory = ReconnectingFactory::builder(info)
            .with_reconnect_config(ReconnectConfig::default().with_max_retries(0))
            .build()
            .unwrap();
        let failed = factory.on_connection_failed();
        factory.connect().unwrap();

        let event = failed.await.unwrap();
        let error = event.error().unwrap();
        assert!(error.is_transport_error());
        assert_eq!(
            *error,
            Error::from(io::Error::from(io::ErrorKind::ConnectionRefused))
        );

        // Out of retries, everything still pending is rejected.
        assert!(factory.on_initial_send().await.is_err());
        assert_eq!(factory.phase(), LifecyclePhase::Failed);
    });
}
