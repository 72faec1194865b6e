//! Ordering and routing of subscription updates.
//!
//! Updates arrive out of order and may be replayed. A [`Reconciler`] keeps the
//! freshest snapshot per key and only forwards an update to the key's queue
//! when it is strictly newer than that snapshot. A key whose update is
//! terminal stops being tracked once that update is delivered.

use crate::api::schema::{Assignation, Reservation, ReservationKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tokio::sync::mpsc;

/// A record that can be reconciled by key and timestamp.
pub trait Update: Clone + Send + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Whether no further update can follow this one.
    fn is_terminal(&self) -> bool {
        false
    }
}

impl Update for Reservation {
    type Key = ReservationKey;

    fn key(&self) -> ReservationKey {
        Reservation::key(self)
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Update for Assignation {
    type Key = String;

    fn key(&self) -> String {
        self.reference.clone()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What happened to an update handed to [`Reconciler::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Newer than the snapshot: stored and delivered.
    Accepted,
    /// Not newer than the snapshot: dropped.
    Stale,
    /// No queue registered for its key: dropped.
    Unknown,
}

pub struct Reconciler<T: Update> {
    snapshots: HashMap<T::Key, T>,
    queues: HashMap<T::Key, mpsc::UnboundedSender<T>>,
}

impl<T: Update> Default for Reconciler<T> {
    fn default() -> Self {
        Self {
            snapshots: HashMap::new(),
            queues: HashMap::new(),
        }
    }
}

impl<T: Update> Reconciler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the delivery queue for `key`, replacing any previous one.
    ///
    /// The snapshot of `key` is discarded, so [`snapshot`](Reconciler::snapshot)
    /// only reports updates received through the new queue.
    pub fn register(&mut self, key: T::Key) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.snapshots.remove(&key);
        self.queues.insert(key, sender);
        receiver
    }

    /// Closes the queue for `key` and discards its snapshot. Returns whether
    /// a queue was registered.
    pub fn unregister(&mut self, key: &T::Key) -> bool {
        self.snapshots.remove(key);
        self.queues.remove(key).is_some()
    }

    /// Delivers `update` if its key is tracked and it is newer than the
    /// snapshot. A delivered terminal update closes the queue and drops the
    /// key, so the receiver sees the end of its stream right after it.
    pub fn accept(&mut self, update: T) -> Reconciliation {
        let key = update.key();
        let Some(queue) = self.queues.get(&key) else {
            return Reconciliation::Unknown;
        };

        if let Some(snapshot) = self.snapshots.get(&key) {
            if update.updated_at() <= snapshot.updated_at() {
                return Reconciliation::Stale;
            }
        }

        if queue.send(update.clone()).is_err() {
            log::debug!("Receiver for {key} was dropped, closing its queue");
            self.queues.remove(&key);
            self.snapshots.remove(&key);
            return Reconciliation::Unknown;
        }
        if update.is_terminal() {
            log::debug!("{key} reached a final state, no longer tracking it");
            self.queues.remove(&key);
            self.snapshots.remove(&key);
        } else {
            self.snapshots.insert(key, update);
        }
        Reconciliation::Accepted
    }

    /// The freshest non-final update seen for `key` while it is tracked.
    pub fn snapshot(&self, key: &T::Key) -> Option<&T> {
        self.snapshots.get(key)
    }

    pub fn is_tracked(&self, key: &T::Key) -> bool {
        self.queues.contains_key(key)
    }

    /// Closes every queue; receivers see the end of their stream.
    pub fn close_all(&mut self) {
        self.queues.clear();
    }
}

impl<T: Update> fmt::Debug for Reconciler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("queues", &self.queues.len())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::schema::AssignationStatus;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::HashMap as Map;

    fn assignation(reference: &str, status: AssignationStatus, at: i64) -> Assignation {
        Assignation {
            id: format!("{reference}-id"),
            reservation: None,
            args: vec![],
            kwargs: Map::new(),
            parent: None,
            status,
            statusmessage: None,
            returns: None,
            reference: reference.into(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(at),
        }
    }

    #[test]
    fn test_newer_update_is_delivered() {
        let mut reconciler = Reconciler::new();
        let mut queue = reconciler.register("r".to_string());

        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Assigned, 1)),
            Reconciliation::Accepted
        );
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Returned, 2)),
            Reconciliation::Accepted
        );
        assert_eq!(queue.try_recv().unwrap().status, AssignationStatus::Assigned);
        assert_eq!(queue.try_recv().unwrap().status, AssignationStatus::Returned);
    }

    #[test]
    fn test_stale_update_is_dropped() {
        let mut reconciler = Reconciler::new();
        let mut queue = reconciler.register("r".to_string());

        reconciler.accept(assignation("r", AssignationStatus::Progress, 2));
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Assigned, 1)),
            Reconciliation::Stale
        );
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Assigned, 2)),
            Reconciliation::Stale
        );
        assert_eq!(queue.try_recv().unwrap().status, AssignationStatus::Progress);
        assert!(queue.try_recv().is_err());
        assert_eq!(
            reconciler.snapshot(&"r".to_string()).unwrap().status,
            AssignationStatus::Progress
        );
    }

    #[test]
    fn test_terminal_update_ends_tracking() {
        let mut reconciler = Reconciler::new();
        let key = "r".to_string();
        let mut queue = reconciler.register(key.clone());

        reconciler.accept(assignation("r", AssignationStatus::Assigned, 1));
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Returned, 2)),
            Reconciliation::Accepted
        );
        assert!(!reconciler.is_tracked(&key));
        assert!(reconciler.snapshot(&key).is_none());

        assert_eq!(queue.try_recv().unwrap().status, AssignationStatus::Assigned);
        assert_eq!(queue.try_recv().unwrap().status, AssignationStatus::Returned);
        assert!(matches!(
            queue.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Done, 3)),
            Reconciliation::Unknown
        );
    }

    #[test]
    fn test_unknown_key_is_dropped() {
        let mut reconciler: Reconciler<Assignation> = Reconciler::new();
        assert_eq!(
            reconciler.accept(assignation("nobody", AssignationStatus::Assigned, 1)),
            Reconciliation::Unknown
        );
        assert!(reconciler.snapshot(&"nobody".to_string()).is_none());
    }

    #[test]
    fn test_dropped_receiver_prunes_queue() {
        let mut reconciler = Reconciler::new();
        let queue = reconciler.register("r".to_string());
        drop(queue);
        assert_eq!(
            reconciler.accept(assignation("r", AssignationStatus::Assigned, 1)),
            Reconciliation::Unknown
        );
        assert!(!reconciler.is_tracked(&"r".to_string()));
    }

    #[test]
    fn test_close_all_ends_streams() {
        let mut reconciler: Reconciler<Assignation> = Reconciler::new();
        let mut queue = reconciler.register("r".to_string());
        reconciler.close_all();
        assert!(matches!(
            queue.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    proptest! {
        #[test]
        fn prop_delivered_timestamps_strictly_increase(stamps in prop::collection::vec(0i64..50, 1..40)) {
            let mut reconciler = Reconciler::new();
            let mut queue = reconciler.register("r".to_string());
            for at in &stamps {
                reconciler.accept(assignation("r", AssignationStatus::Progress, *at));
            }

            let mut delivered = Vec::new();
            while let Ok(update) = queue.try_recv() {
                delivered.push(update.updated_at);
            }
            prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));

            let newest = stamps.iter().copied().max().unwrap_or_default();
            let snapshot = reconciler.snapshot(&"r".to_string()).unwrap();
            prop_assert_eq!(
                snapshot.updated_at,
                DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(newest)
            );
        }
    }
}
