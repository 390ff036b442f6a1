//! Input bus: bounded, producer-nonblocking, single-consumer.
//!
//! Producers call [`InputBus::publish_nowait`] from any task and never
//! block; when the queue is full the newest observation is dropped and
//! counted. The router holds the single [`BusReceiver`] and drains the
//! queue in FIFO order. After [`InputBus::close`] the receiver drains what
//! is buffered, then ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use synapse_core::{Observation, ObservationError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::Notify;

/// Default bus queue capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

/// Why a publish did not enqueue.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("bus closed")]
    Closed,

    #[error("bus queue full")]
    QueueFull,

    #[error(transparent)]
    Invalid(#[from] ObservationError),
}

struct BusShared {
    closed: AtomicBool,
    close_notify: Notify,
    published_total: AtomicU64,
    dropped_total: AtomicU64,
    consumed_total: AtomicU64,
}

/// Producer handle. Cheap to clone; all clones share one queue and one set
/// of counters.
#[derive(Clone)]
pub struct InputBus {
    tx: mpsc::Sender<Observation>,
    shared: Arc<BusShared>,
}

/// The single consumer side, held by the router loop.
pub struct BusReceiver {
    rx: mpsc::Receiver<Observation>,
    shared: Arc<BusShared>,
}

impl InputBus {
    pub fn new(capacity: usize) -> (Self, BusReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(BusShared {
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            published_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            consumed_total: AtomicU64::new(0),
        });
        (
            Self {
                tx,
                shared: shared.clone(),
            },
            BusReceiver { rx, shared },
        )
    }

    /// Validate and enqueue without blocking.
    ///
    /// Validation failures do not enqueue and are reported as
    /// [`PublishError::Invalid`]; a full queue drops the observation
    /// (drop-newest) and bumps `dropped_total`.
    pub fn publish_nowait(&self, mut obs: Observation) -> Result<(), PublishError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(PublishError::Closed);
        }

        obs.validate()?;
        self.shared.published_total.fetch_add(1, Ordering::Relaxed);

        match self.tx.try_send(obs) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.dropped_total.fetch_add(1, Ordering::Relaxed);
                Err(PublishError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(PublishError::Closed),
        }
    }

    /// Idempotent. Producers see `Closed` afterwards; the consumer drains
    /// the remaining queue and then ends.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.close_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn published_total(&self) -> u64 {
        self.shared.published_total.load(Ordering::Relaxed)
    }

    pub fn dropped_total(&self) -> u64 {
        self.shared.dropped_total.load(Ordering::Relaxed)
    }

    pub fn consumed_total(&self) -> u64 {
        self.shared.consumed_total.load(Ordering::Relaxed)
    }
}

impl BusReceiver {
    /// Next observation in FIFO order, or `None` once the bus is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<Observation> {
        loop {
            match self.rx.try_recv() {
                Ok(obs) => {
                    self.shared.consumed_total.fetch_add(1, Ordering::Relaxed);
                    return Some(obs);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return None,
            }

            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            tokio::select! {
                obs = self.rx.recv() => match obs {
                    Some(obs) => {
                        self.shared.consumed_total.fetch_add(1, Ordering::Relaxed);
                        return Some(obs);
                    }
                    None => return None,
                },
                _ = self.shared.close_notify.notified() => {
                    // Loop back to drain anything still buffered.
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use synapse_core::Actor;

    fn obs(text: &str) -> Observation {
        Observation::message("text_input", Some("dm:a".into()), Actor::user("a"), text)
    }

    #[tokio::test]
    async fn test_publish_and_consume_fifo() {
        let (bus, mut rx) = InputBus::new(10);
        bus.publish_nowait(obs("one")).unwrap();
        bus.publish_nowait(obs("two")).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message_payload().unwrap().normalized_text(), "one");
        assert_eq!(second.message_payload().unwrap().normalized_text(), "two");
        assert_eq!(bus.published_total(), 2);
        assert_eq!(bus.consumed_total(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (bus, _rx) = InputBus::new(1);
        bus.publish_nowait(obs("kept")).unwrap();

        let result = bus.publish_nowait(obs("dropped"));
        assert!(matches!(result, Err(PublishError::QueueFull)));
        assert_eq!(bus.dropped_total(), 1);
    }

    #[tokio::test]
    async fn test_validation_failure_does_not_enqueue() {
        let (bus, mut rx) = InputBus::new(10);
        let bad = Observation::message("", Some("dm:a".into()), Actor::user("a"), "hi");

        let result = bus.publish_nowait(bad);
        assert!(matches!(result, Err(PublishError::Invalid(_))));
        assert_eq!(bus.published_total(), 0);

        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (bus, mut rx) = InputBus::new(10);
        bus.publish_nowait(obs("buffered")).unwrap();
        bus.close();

        assert!(matches!(
            bus.publish_nowait(obs("late")),
            Err(PublishError::Closed)
        ));

        assert!(rx.recv().await.is_some(), "buffered item is drained");
        assert!(rx.recv().await.is_none(), "then iteration ends");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (bus, mut rx) = InputBus::new(10);
        bus.close();
        bus.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let (bus, mut rx) = InputBus::new(10);
        let waiter = tokio::spawn(async move { rx.recv().await });

        tokio::task::yield_now().await;
        bus.close();

        let got = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("consumer must wake up")
            .unwrap();
        assert!(got.is_none());
    }
}
