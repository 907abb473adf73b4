//! Subscriber mailboxes and fan-out
//!
//! Each subscriber owns a single-slot mailbox. Publishing replaces whatever
//! the slot holds, so a slow consumer only ever sees the newest snapshot and
//! the publisher never waits on it.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use super::component::Snapshot;

type Slot = watch::Sender<Option<Snapshot>>;

/// Receiving side of a subscription
#[derive(Debug)]
pub struct Mailbox {
    rx: watch::Receiver<Option<Snapshot>>,
}

impl Mailbox {
    /// Wait for a snapshot newer than the last one read.
    ///
    /// Returns `None` once the discoverer has been dropped and the last
    /// snapshot was already read.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(snapshot) = self.rx.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    /// Take the unread snapshot, if any, without waiting
    ///
    /// An unread snapshot is still returned after the discoverer is dropped.
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        let slot = self.rx.borrow_and_update();
        if !slot.has_changed() {
            return None;
        }
        slot.clone()
    }

    /// Whether a snapshot is waiting to be read
    pub fn has_pending(&self) -> bool {
        self.rx.borrow().has_changed()
    }
}

/// Something downstream consumers can subscribe to for topology updates
pub trait TopologySubscriber: Send + Sync {
    fn subscribe(&self) -> Mailbox;
}

/// Append-only list of subscriber slots
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    slots: Mutex<Vec<Arc<Slot>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a mailbox and register its slot
    pub fn register(&self) -> Mailbox {
        let (tx, rx) = watch::channel(None);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(tx));
        Mailbox { rx }
    }

    /// Deposit `snapshot` into every registered mailbox, replacing any
    /// unread one. The slot list is copied under the lock and written
    /// without it. Returns the number of mailboxes written.
    pub fn publish_all(&self, snapshot: &Snapshot) -> usize {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for slot in &slots {
            slot.send_replace(Some(Arc::clone(snapshot)));
        }
        slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Component, ComponentName};
    use std::time::Duration;

    fn snapshot(ports: &[u16]) -> Snapshot {
        Arc::new(
            ports
                .iter()
                .map(|p| Component::new(ComponentName::TiDB, "10.0.0.1", *p, 10080))
                .collect(),
        )
    }

    #[test]
    fn test_new_mailbox_is_empty() {
        let registry = SubscriberRegistry::new();
        let mut mailbox = registry.register();
        assert!(!mailbox.has_pending());
        assert!(mailbox.try_recv().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_publish_reaches_every_mailbox() {
        let registry = SubscriberRegistry::new();
        let mut mailboxes: Vec<Mailbox> = (0..5).map(|_| registry.register()).collect();

        let published = snapshot(&[4000]);
        assert_eq!(registry.publish_all(&published), 5);

        for mailbox in &mut mailboxes {
            assert_eq!(mailbox.try_recv(), Some(Arc::clone(&published)));
            assert!(mailbox.try_recv().is_none());
        }
    }

    #[test]
    fn test_unread_snapshot_is_replaced_not_queued() {
        let registry = SubscriberRegistry::new();
        let mut mailbox = registry.register();

        registry.publish_all(&snapshot(&[4000]));
        registry.publish_all(&snapshot(&[4001]));
        registry.publish_all(&snapshot(&[4002]));

        let latest = mailbox.try_recv().unwrap();
        assert_eq!(latest[0].port, 4002);
        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn test_dropped_mailbox_stays_registered() {
        let registry = SubscriberRegistry::new();
        drop(registry.register());
        let mut live = registry.register();

        assert_eq!(registry.publish_all(&snapshot(&[4000])), 2);
        assert!(live.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let registry = Arc::new(SubscriberRegistry::new());
        let mut mailbox = registry.register();

        let publisher = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish_all(&snapshot(&[4000, 4001]));
        });

        let received = tokio::time::timeout(Duration::from_secs(5), mailbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_recv_ends_when_registry_dropped() {
        let registry = SubscriberRegistry::new();
        let mut mailbox = registry.register();
        registry.publish_all(&snapshot(&[4000]));
        drop(registry);

        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());
    }

    #[test]
    fn test_try_recv_drains_after_registry_dropped() {
        let registry = SubscriberRegistry::new();
        let mut mailbox = registry.register();
        registry.publish_all(&snapshot(&[4000]));
        drop(registry);

        assert!(mailbox.has_pending());
        let last = mailbox.try_recv().unwrap();
        assert_eq!(last[0].port, 4000);
        assert!(!mailbox.has_pending());
        assert!(mailbox.try_recv().is_none());
    }

    #[test]
    fn test_concurrent_register_and_publish() {
        let registry = Arc::new(SubscriberRegistry::new());
        let published = snapshot(&[4000]);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let published = Arc::clone(&published);
                std::thread::spawn(move || {
                    let mut mailboxes = Vec::new();
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            mailboxes.push(registry.register());
                        } else {
                            registry.publish_all(&published);
                        }
                    }
                    mailboxes.len()
                })
            })
            .collect();

        let registered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(registered, 400);
        assert_eq!(registry.len(), 400);
    }
}
