use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll, Waker},
};

#[derive(Default)]
pub(crate) struct Wakers(Vec<Waker>);

impl Wakers {
    pub(crate) fn register(&mut self, waker: &Waker) {
        if !self.0.iter().any(|w| w.will_wake(waker)) {
            self.0.push(waker.clone());
        }
    }

    pub(crate) fn wake(&mut self) {
        for w in self.0.drain(..) {
            w.wake();
        }
    }
}

/// Level-triggered notification: once notified, every present and future poll is ready.
///
/// Used to interrupt the reconnect loop on shutdown.
#[derive(Default, Clone)]
pub(crate) struct Notifier {
    done: Arc<AtomicBool>,
    wakers: Arc<Mutex<Wakers>>,
}

impl Notifier {
    pub(crate) fn notify_all(&self) {
        self.done.store(true, Ordering::Release);
        self.wakers.lock().wake();
    }

    pub(crate) fn notified(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Future for Notifier {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.notified() {
            return Poll::Ready(());
        }
        self.wakers.lock().register(cx.waker());
        // notify_all may have run between the check and the registration
        if self.notified() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Notifier").field(&self.notified()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future;

    #[test]
    fn wakes_every_clone() {
        let notifier = Notifier::default();
        let mut first = notifier.clone();
        let mut second = notifier.clone();
        assert!(future::block_on(future::poll_once(&mut first)).is_none());
        assert!(future::block_on(future::poll_once(&mut second)).is_none());
        notifier.notify_all();
        assert!(future::block_on(future::poll_once(&mut first)).is_some());
        assert!(future::block_on(future::poll_once(&mut second)).is_some());
        assert!(notifier.notified());
    }
}
