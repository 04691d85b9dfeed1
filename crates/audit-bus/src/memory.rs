//! # In-Memory Broker
//!
//! Single-process implementation of [`Broker`] with queue-group semantics.
//! Suitable for tests and single-node setups; liveness can be toggled and
//! publish failures injected to exercise the retry paths.
//!
//! Queue groups are durable while the broker lives: a message no member can
//! take right now (queues full, member requeued it, or no member left) is
//! kept in the group backlog and handed out as members ack or join.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::broker::{
    Acknowledger, Broker, BrokerError, Delivery, MessageHandler, Subscription,
    DEFAULT_DELIVERY_CAPACITY,
};

/// Members of one queue group, served round-robin.
#[derive(Default)]
struct QueueGroup {
    next: usize,
    members: Vec<(u64, mpsc::Sender<Delivery>)>,
    backlog: VecDeque<Vec<u8>>,
}

impl QueueGroup {
    /// Hand `payload` to the next member with queue space, skipping
    /// `exclude`. Members whose receiver is gone are pruned. Gives the
    /// payload back if nobody could take it.
    fn offer(&mut self, mut payload: Vec<u8>, exclude: Option<u64>, origin: &Origin) -> Result<(), Vec<u8>> {
        let mut tried = 0;
        while tried < self.members.len() {
            let index = self.next % self.members.len();
            let id = self.members[index].0;
            if exclude == Some(id) {
                self.next = index + 1;
                tried += 1;
                continue;
            }

            let delivery = Delivery::new(payload, Box::new(origin.acker(id)));
            match self.members[index].1.try_send(delivery) {
                Ok(()) => {
                    self.next = index + 1;
                    return Ok(());
                }
                Err(TrySendError::Full(delivery)) => {
                    payload = delivery.into_payload();
                    self.next = index + 1;
                    tried += 1;
                }
                Err(TrySendError::Closed(delivery)) => {
                    payload = delivery.into_payload();
                    self.members.remove(index);
                }
            }
        }
        Err(payload)
    }

    /// Move backlog messages, oldest first, into members with queue space.
    fn refill(&mut self, origin: &Origin) {
        while let Some(payload) = self.backlog.pop_front() {
            if let Err(payload) = self.offer(payload, None, origin) {
                self.backlog.push_front(payload);
                break;
            }
        }
    }

    /// Deliver a fresh message behind anything already waiting.
    fn enqueue(&mut self, payload: Vec<u8>, origin: &Origin) {
        self.refill(origin);
        if !self.backlog.is_empty() {
            self.backlog.push_back(payload);
            return;
        }
        if let Err(payload) = self.offer(payload, None, origin) {
            debug!(topic = %origin.topic, group = %origin.group, "No member free, message held in backlog");
            self.backlog.push_back(payload);
        }
    }
}

/// topic -> group -> members
type Routes = HashMap<String, HashMap<String, QueueGroup>>;

/// Where a delivery came from, for settling it later.
#[derive(Clone)]
struct Origin {
    routes: Weak<Mutex<Routes>>,
    topic: String,
    group: String,
}

impl Origin {
    fn acker(&self, member: u64) -> MemoryAck {
        MemoryAck {
            origin: self.clone(),
            member,
        }
    }
}

struct MemoryAck {
    origin: Origin,
    member: u64,
}

#[async_trait]
impl Acknowledger for MemoryAck {
    /// The member has room again: pull from the backlog.
    async fn ack(&self) {
        let Some(routes) = self.origin.routes.upgrade() else {
            return;
        };
        let mut routes = routes.lock();
        if let Some(queue) = routes
            .get_mut(&self.origin.topic)
            .and_then(|groups| groups.get_mut(&self.origin.group))
        {
            queue.refill(&self.origin);
        }
    }

    /// Offer the message to another member, or park it in the backlog.
    async fn requeue(&self, payload: Vec<u8>) {
        let Some(routes) = self.origin.routes.upgrade() else {
            return;
        };
        let mut routes = routes.lock();
        let queue = routes
            .entry(self.origin.topic.clone())
            .or_default()
            .entry(self.origin.group.clone())
            .or_default();

        if !queue.backlog.is_empty() {
            queue.backlog.push_back(payload);
            return;
        }
        if let Err(payload) = queue.offer(payload, Some(self.member), &self.origin) {
            queue.backlog.push_back(payload);
        }
        debug!(subscription = self.member, "Delivery requeued");
    }
}

/// In-memory implementation of the broker.
pub struct InMemoryBroker {
    connected: AtomicBool,
    routes: Arc<Mutex<Routes>>,
    queue_capacity: usize,
    next_id: AtomicU64,
    failing_publishes: AtomicU32,
    messages_published: AtomicU64,
}

impl InMemoryBroker {
    /// Create a connected broker with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_DELIVERY_CAPACITY)
    }

    /// Broker whose members each queue at most `capacity` deliveries.
    #[must_use]
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            connected: AtomicBool::new(true),
            routes: Arc::new(Mutex::new(HashMap::new())),
            queue_capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            failing_publishes: AtomicU32::new(0),
            messages_published: AtomicU64::new(0),
        }
    }

    /// Simulate a connection loss or reconnection.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next `count` publishes fail while connected.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Messages accepted by `publish`.
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Number of members across all groups of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.routes
            .lock()
            .get(topic)
            .map(|groups| groups.values().map(|g| g.members.len()).sum())
            .unwrap_or(0)
    }

    /// Messages held for `group` on `topic` that no member has taken yet.
    pub fn backlog_len(&self, topic: &str, group: &str) -> usize {
        self.routes
            .lock()
            .get(topic)
            .and_then(|groups| groups.get(group))
            .map(|g| g.backlog.len())
            .unwrap_or(0)
    }

    fn origin(&self, topic: &str, group: &str) -> Origin {
        Origin {
            routes: Arc::downgrade(&self.routes),
            topic: topic.to_string(),
            group: group.to_string(),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        if self.take_injected_failure() {
            return Err(BrokerError::PublishFailed("injected failure".to_string()));
        }

        self.messages_published.fetch_add(1, Ordering::Relaxed);

        let mut routes = self.routes.lock();
        let Some(groups) = routes.get_mut(topic) else {
            debug!(topic, "Message dropped (no subscribers)");
            return Ok(());
        };
        for (group, queue) in groups.iter_mut() {
            queue.enqueue(payload.clone(), &self.origin(topic, group));
        }
        Ok(())
    }

    async fn queue_subscribe(
        &self,
        topic: &str,
        group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, BrokerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);

        {
            let mut routes = self.routes.lock();
            let queue = routes
                .entry(topic.to_string())
                .or_default()
                .entry(group.to_string())
                .or_default();
            queue.members.push((id, sender));
            queue.refill(&self.origin(topic, group));
        }

        debug!(topic, group, subscription = id, "Queue subscription created");
        Ok(Subscription::spawn(id, topic, group, receiver, handler))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BrokerError> {
        {
            let mut routes = self.routes.lock();
            if let Some(groups) = routes.get_mut(subscription.topic()) {
                if let Some(queue) = groups.get_mut(subscription.group()) {
                    queue.members.retain(|(id, _)| *id != subscription.id());
                    if queue.members.is_empty() && queue.backlog.is_empty() {
                        groups.remove(subscription.group());
                    }
                }
                if groups.is_empty() {
                    routes.remove(subscription.topic());
                }
            }
        }
        debug!(subscription = subscription.id(), "Queue subscription removed");
        // Deliveries still queued for this member come back through requeue
        subscription.stop().await;
        Ok(())
    }
}
