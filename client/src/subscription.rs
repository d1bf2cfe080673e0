//! Subscriber registry shared by connections and the broker
//!
//! A subscriber is the sending half of a bounded `mpsc` channel whose
//! receiver belongs to the consumer. The registry owns the sender: removing
//! an entry drops it, and the consumer's `recv` then returns `None` instead
//! of hanging.
//!
//! Delivery never waits. A full queue drops the item for that subscriber
//! only; a closed queue marks the subscriber for removal.

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Subscribers<T> {
    next_id: u64,
    active: HashMap<SubscriptionId, mpsc::Sender<T>>,
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            active: HashMap::new(),
        }
    }

    /// Registers `out` under a freshly allocated id.
    pub fn add(&mut self, out: mpsc::Sender<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.active.insert(id, out);
        id
    }

    /// Registers `out` under an id allocated elsewhere.
    pub fn insert(&mut self, id: SubscriptionId, out: mpsc::Sender<T>) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.active.insert(id, out);
    }

    /// Removes and closes a subscription. Returns false if it was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.active.remove(&id).is_some()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.active.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Offers `item` to every subscriber without blocking.
    ///
    /// Returns the subscriptions whose receiver has been dropped so the
    /// caller can remove them.
    pub fn publish(&self, item: &T) -> Vec<SubscriptionId> {
        let mut gone = Vec::new();

        for (id, out) in &self.active {
            match out.try_send(item.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not draining its queue, dropping item", id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} went away", id);
                    gone.push(*id);
                }
            }
        }

        gone
    }

    /// Removes and closes every subscription, returning how many there were.
    pub fn close_all(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }
}

impl<T: Clone> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}
