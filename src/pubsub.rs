//! Pub/Sub bus (C1): typed channels between producing and consuming wants.
//!
//! Topic = producer want ID. Delivery is non-blocking: when a consumer's
//! queue is full the oldest undelivered message for that consumer is
//! dropped and a drop counter increments — other consumers on the same
//! topic are unaffected. Subscriber bookkeeping uses `DashMap`s the way the
//! teacher's `registry.rs`/`store/mem.rs` index concurrent collections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::Value;

use crate::error::PubSubError;

#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Value,
    pub sequence: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub done: bool,
}

/// Per-consumer bounded FIFO. Drop-oldest-on-full, matching the teacher's
/// `try_send`-then-drain pattern rather than an unbounded queue.
struct ConsumerQueue {
    capacity: usize,
    messages: Mutex<VecDeque<Message>>,
    dropped: AtomicU64,
    done: std::sync::atomic::AtomicBool,
}

impl ConsumerQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
            done: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn push(&self, message: Message) {
        // A DONE message followed by further publishes is suppressed: once
        // a stream is marked done, subsequent non-done payloads are dropped
        // silently (spec §8 boundary behaviour).
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.messages.lock().expect("pubsub queue mutex poisoned");
        if queue.len() == self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if message.done {
            self.done.store(true, Ordering::Release);
        }
        queue.push_back(message);
    }

    fn drain(&self) -> Vec<Message> {
        self.messages.lock().expect("pubsub queue mutex poisoned").drain(..).collect()
    }
}

pub struct Subscription {
    pub topic: String,
    pub consumer_id: String,
    queue: Arc<ConsumerQueue>,
}

impl Subscription {
    /// Non-blocking poll of everything queued since the last call.
    pub fn poll(&self) -> Vec<Message> {
        self.queue.drain()
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}

struct Topic {
    sequence: AtomicI64,
    subscribers: DashMap<String, Arc<ConsumerQueue>>,
}

impl Topic {
    fn new() -> Self {
        Self {
            sequence: AtomicI64::new(0),
            subscribers: DashMap::new(),
        }
    }
}

/// Default per-consumer queue depth before drop-oldest kicks in.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub struct PubSub {
    topics: DashMap<String, Arc<Topic>>,
    queue_capacity: usize,
    pub_sub_drops: AtomicU64,
}

impl PubSub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            queue_capacity,
            pub_sub_drops: AtomicU64::new(0),
        }
    }

    fn topic(&self, topic: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(topic.to_string())
                .or_insert_with(|| Arc::new(Topic::new()))
                .value(),
        )
    }

    /// Idempotent: a second subscription from the same consumer_id returns
    /// a subscription wrapping the same underlying queue (spec §4.1).
    pub fn subscribe(&self, topic: &str, consumer_id: &str) -> Subscription {
        let t = self.topic(topic);
        let queue = Arc::clone(
            t.subscribers
                .entry(consumer_id.to_string())
                .or_insert_with(|| Arc::new(ConsumerQueue::new(self.queue_capacity)))
                .value(),
        );
        Subscription {
            topic: topic.to_string(),
            consumer_id: consumer_id.to_string(),
            queue,
        }
    }

    pub fn unsubscribe(&self, topic: &str, consumer_id: &str) -> Result<(), PubSubError> {
        let Some(t) = self.topics.get(topic) else {
            return Err(PubSubError::NoSuchSubscription {
                topic: topic.to_string(),
                consumer_id: consumer_id.to_string(),
            });
        };
        t.subscribers
            .remove(consumer_id)
            .map(|_| ())
            .ok_or_else(|| PubSubError::NoSuchSubscription {
                topic: topic.to_string(),
                consumer_id: consumer_id.to_string(),
            })
    }

    /// Delivers a copy of `payload` to every currently subscribed consumer
    /// on `topic`, incrementing the topic-wide sequence counter once.
    pub fn publish(&self, topic: &str, payload: Value, done: bool) {
        let t = self.topic(topic);
        let sequence = t.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let message = Message {
            payload,
            sequence,
            timestamp: chrono::Utc::now(),
            done,
        };
        let mut any_dropped = false;
        for entry in t.subscribers.iter() {
            let before = entry.value().dropped.load(Ordering::Relaxed);
            entry.value().push(message.clone());
            if entry.value().dropped.load(Ordering::Relaxed) != before {
                any_dropped = true;
            }
        }
        if any_dropped {
            self.pub_sub_drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.subscribers.len()).unwrap_or(0)
    }

    pub fn total_drops(&self) -> u64 {
        self.pub_sub_drops.load(Ordering::Relaxed)
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_delivers_in_order() {
        let bus = PubSub::new();
        let sub = bus.subscribe("producer-1", "consumer-a");
        bus.publish("producer-1", Value::from(1), false);
        bus.publish("producer-1", Value::from(2), false);
        let msgs = sub.poll();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].sequence, 1);
        assert_eq!(msgs[1].sequence, 2);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let bus = PubSub::new();
        let sub1 = bus.subscribe("t", "c");
        bus.publish("t", Value::from("a"), false);
        let _sub2 = bus.subscribe("t", "c");
        assert_eq!(bus.subscriber_count("t"), 1);
        assert_eq!(sub1.poll().len(), 1);
    }

    #[test]
    fn full_queue_drops_oldest_for_that_consumer_only() {
        let bus = PubSub::with_capacity(2);
        let victim = bus.subscribe("t", "victim");
        let bystander = bus.subscribe("t", "bystander");
        bus.publish("t", Value::from(1), false);
        bus.publish("t", Value::from(2), false);
        bus.publish("t", Value::from(3), false);

        let victim_msgs = victim.poll();
        assert_eq!(victim_msgs.len(), 2);
        assert_eq!(victim_msgs[0].payload, Value::from(2));
        assert_eq!(victim.dropped_count(), 1);

        let bystander_msgs = bystander.poll();
        assert_eq!(bystander_msgs.len(), 2);
        assert_eq!(bystander.dropped_count(), 1);
    }

    #[test]
    fn done_message_suppresses_subsequent_payloads() {
        let bus = PubSub::new();
        let sub = bus.subscribe("t", "c");
        bus.publish("t", Value::from(1), true);
        bus.publish("t", Value::from(2), false);
        let msgs = sub.poll();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].done);
    }

    #[test]
    fn unsubscribe_unknown_consumer_errors() {
        let bus = PubSub::new();
        let err = bus.unsubscribe("t", "ghost").unwrap_err();
        assert!(matches!(err, PubSubError::NoSuchSubscription { .. }));
    }
}
