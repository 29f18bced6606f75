//! Subscription Router Module
//!
//! Maps topic names to the destination their notifications are pushed to.
//! Lookups and registrations happen under the connection lock; the push itself
//! happens after the lock is released and waits for buffer space, so a slow
//! consumer stalls the dispatcher and with it every other inbound frame.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::protocol::Topic;

/// Delivery end for one topic's notification payloads
#[derive(Debug, Clone)]
pub struct Destination {
    tx: mpsc::Sender<Value>,
}

impl Destination {
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    /// Bounded destination and the receiver the consumer reads from
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Push a payload, waiting for space. `false` if the consumer is gone.
    pub async fn push(&self, payload: Value) -> bool {
        self.tx.send(payload).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Topic to destination mapping
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    routes: HashMap<Topic, Destination>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `destination` for `topic`, returning the one it replaces
    pub fn register(&mut self, topic: Topic, destination: Destination) -> Option<Destination> {
        self.routes.insert(topic, destination)
    }

    pub fn unregister(&mut self, topic: &str) -> bool {
        self.routes.remove(topic).is_some()
    }

    /// Destination for `topic`, cloned so it can be used outside the lock
    pub fn route(&self, topic: &str) -> Option<Destination> {
        self.routes.get(topic).cloned()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.routes.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Drop every destination; consumers observe end of stream
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}
