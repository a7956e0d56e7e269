use crate::Result;
use std::{fmt, future::Future, ops::Deref, pin::Pin, sync::Arc, time::Duration};

/// A boxed future the runtime can drive.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Where the factory spawns its reconnect loop and listeners, and how it waits between
/// attempts.
pub trait Runtime: fmt::Debug + Send + Sync + 'static {
    /// Run the future to completion in the background.
    fn spawn(&self, f: BoxFuture<()>);
    /// A future resolving once `delay` has elapsed.
    fn sleep(&self, delay: Duration) -> BoxFuture<()>;
}

impl Runtime for Arc<dyn Runtime> {
    fn spawn(&self, f: BoxFuture<()>) {
        self.deref().spawn(f)
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<()> {
        self.deref().sleep(delay)
    }
}

/// Spawns onto the async-global-executor thread pool and sleeps using async-io timers.
#[cfg(feature = "default-runtime")]
#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncGlobalRuntime;

#[cfg(feature = "default-runtime")]
impl Runtime for AsyncGlobalRuntime {
    fn spawn(&self, f: BoxFuture<()>) {
        async_global_executor::spawn(f).detach();
    }

    fn sleep(&self, delay: Duration) -> BoxFuture<()> {
        Box::pin(async move {
            async_io::Timer::after(delay).await;
        })
    }
}

#[cfg(feature = "default-runtime")]
pub fn default_runtime() -> Result<Arc<dyn Runtime>> {
    Ok(Arc::new(AsyncGlobalRuntime))
}

#[cfg(not(feature = "default-runtime"))]
pub fn default_runtime() -> Result<Arc<dyn Runtime>> {
    Err(crate::Error::NoDefaultRuntime)
}
