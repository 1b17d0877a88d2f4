//! Status broadcast for session observers.
//!
//! Every subscriber owns a bounded queue drained by its own listener thread.
//! [`StatusBus::publish`] never blocks: a subscriber that falls behind loses
//! events once its queue is full. Events reach one subscriber in publish
//! order; there is no ordering between different subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use flume::{Sender, TrySendError};
use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::config::STATUS_QUEUE_CAPACITY;

mod progress;

pub use progress::ProgressTracker;

/// Lifecycle event of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Start,
    Update { message: String, percent: f64 },
    End,
    Error(String),
}

impl Status {
    pub fn update(message: impl Into<String>, percent: f64) -> Self {
        Self::Update { message: message.into(), percent }
    }
}

type Listeners = Mutex<HashMap<u64, Sender<Status>>>;

#[derive(Clone, Default)]
pub struct StatusBus {
    listeners: Arc<Listeners>,
    next_id: Arc<AtomicU64>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback`; it runs on a dedicated thread for every event
    /// published until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Status) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded::<Status>(STATUS_QUEUE_CAPACITY);

        let spawned = thread::Builder::new().name(format!("status-listener-{id}")).spawn(move || {
            for status in rx.iter() {
                callback(&status);
            }
        });

        match spawned {
            Ok(_) => {
                self.lock().insert(id, tx);
            }
            Err(e) => warn!("failed to spawn status listener: {e}"),
        }

        Subscription { id, listeners: Arc::clone(&self.listeners) }
    }

    /// Hands `status` to every subscriber without waiting for any of them.
    pub fn publish(&self, status: &Status) {
        let mut closed = Vec::new();
        let mut listeners = self.lock();
        for (id, tx) in listeners.iter() {
            match tx.try_send(status.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!(subscriber = id, "status queue full, event dropped"),
                Err(TrySendError::Disconnected(_)) => closed.push(*id),
            }
        }
        for id in closed {
            listeners.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Sender<Status>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a callback registered on a [`StatusBus`].
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    listeners: Arc<Listeners>,
}

impl Subscription {
    /// Removes the callback. Events already queued are still delivered.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn collector(bus: &StatusBus) -> (Subscription, flume::Receiver<Status>) {
        let (tx, rx) = flume::unbounded();
        let sub = bus.subscribe(move |status| {
            let _ = tx.send(status.clone());
        });
        (sub, rx)
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let bus = StatusBus::new();
        let (_sub, rx) = collector(&bus);

        bus.publish(&Status::Start);
        for i in 0..10 {
            bus.publish(&Status::update("working", f64::from(i)));
        }
        bus.publish(&Status::End);

        let received: Vec<Status> = (0..12).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        assert_eq!(received.first(), Some(&Status::Start));
        assert_eq!(received.last(), Some(&Status::End));
        for (i, status) in received[1..11].iter().enumerate() {
            assert_eq!(status, &Status::update("working", f64::from(u32::try_from(i).unwrap())));
        }
    }

    #[test]
    fn test_every_subscriber_gets_the_event() {
        let bus = StatusBus::new();
        let (_a, rx_a) = collector(&bus);
        let (_b, rx_b) = collector(&bus);

        bus.publish(&Status::Error("boom".into()));

        assert_eq!(rx_a.recv_timeout(Duration::from_secs(5)).unwrap(), Status::Error("boom".into()));
        assert_eq!(rx_b.recv_timeout(Duration::from_secs(5)).unwrap(), Status::Error("boom".into()));
    }

    #[test]
    fn test_unsubscribe_removes_callback() {
        let bus = StatusBus::new();
        let (sub, rx) = collector(&bus);
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(&Status::Start);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = StatusBus::new();
        {
            let _sub = bus.subscribe(|_| {});
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_subscriber_does_not_block_publisher() {
        let bus = StatusBus::new();
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let _slow = bus.subscribe(move |_| {
            let _ = gate_rx.recv();
        });

        for _ in 0..(STATUS_QUEUE_CAPACITY * 2) {
            bus.publish(&Status::update("flood", 1.0));
        }
        drop(gate_tx);
    }
}
