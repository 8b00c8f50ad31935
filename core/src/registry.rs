// Connection registry
//
// Replaces the old process-global channel objects: views obtain an
// explicit handle per topic, and the last handle to detach tears the
// topic entry down.

use crate::envelope::Envelope;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queue depth per subscriber. Live updates are replace-on-arrival on
/// the render side, so a shallow queue that drops under pressure beats
/// a deep one that delivers stale frames.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Per-subscriber delivery endpoint
#[derive(Debug, Clone)]
struct Subscriber {
    id: String,
    sender: mpsc::Sender<Envelope>,
}

/// Per-topic delivery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub dropped_messages: u64,
    pub active_subscriptions: usize,
}

/// Topic-keyed message fan-out with reference-counted subscriptions.
///
/// Cheap to clone; clones share the same topic table.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    // Topic -> subscriber list
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,

    // Statistics
    stats: Arc<DashMap<String, ChannelStats>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Opens a subscription on a topic.
    ///
    /// Opening the same topic again reuses the topic entry and bumps
    /// its reference count; see [`Subscription::close`].
    pub fn open(&self, topic: &str) -> Subscription {
        let subscription_id = format!("sub_{}_{}", topic, next_id());
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);

        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id: subscription_id.clone(),
                sender: tx,
            });

        self.update_stats(topic, |stats| {
            stats.active_subscriptions += 1;
        });

        info!(
            target: "registry",
            subscription = %subscription_id,
            topic = %topic,
            "Opened subscription"
        );

        Subscription {
            id: subscription_id,
            topic: topic.to_string(),
            registry: self.clone(),
            receiver: rx,
            closed: false,
        }
    }

    /// Publishes an envelope to every live subscriber of its topic.
    ///
    /// Returns the number of subscribers the message reached. Full
    /// queues drop the message for that subscriber rather than block
    /// the publisher.
    pub fn publish(&self, envelope: Envelope) -> usize {
        let topic = envelope.topic.clone();
        debug!(target: "registry", topic = %topic, "Publishing envelope");

        self.update_stats(&topic, |stats| {
            stats.total_published += 1;
        });

        let Some(subs) = self.subscribers.get(&topic) else {
            debug!(target: "registry", topic = %topic, "No subscriptions for topic");
            return 0;
        };

        let mut delivered = 0u64;
        let mut dropped = 0u64;
        for sub in subs.value() {
            if sub.sender.try_send(envelope.clone()).is_ok() {
                delivered += 1;
            } else {
                dropped += 1;
                warn!(
                    target: "registry",
                    subscription = %sub.id,
                    topic = %topic,
                    "Dropped envelope for slow subscriber"
                );
            }
        }
        drop(subs);

        self.update_stats(&topic, |stats| {
            stats.total_delivered += delivered;
            stats.dropped_messages += dropped;
        });

        delivered as usize
    }

    /// Reference count for a topic (number of open subscriptions).
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.subscribers.get(topic).map_or(0, |s| s.len())
    }

    /// Whether any subscription is open on a topic.
    pub fn is_open(&self, topic: &str) -> bool {
        self.subscription_count(topic) > 0
    }

    /// Get stats for a topic
    pub fn stats(&self, topic: &str) -> Option<ChannelStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    // Removes one subscriber; the last one out removes the topic entry.
    fn detach(&self, topic: &str, subscription_id: &str) {
        let mut removed = false;
        if let Some(mut entry) = self.subscribers.get_mut(topic) {
            let before = entry.len();
            entry.retain(|sub| sub.id != subscription_id);
            removed = entry.len() < before;
        }
        self.subscribers
            .remove_if(topic, |_, subs| subs.is_empty());

        if removed {
            self.update_stats(topic, |stats| {
                stats.active_subscriptions = stats.active_subscriptions.saturating_sub(1);
            });
            info!(
                target: "registry",
                subscription = %subscription_id,
                topic = %topic,
                "Closed subscription"
            );
        }
    }

    // Update stats helper function
    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut ChannelStats),
    {
        let mut entry = self.stats.entry(topic.to_string()).or_default();
        f(entry.value_mut());
    }
}

/// Handle to an open topic subscription.
///
/// Dropping the handle closes it; calling [`close`](Self::close)
/// repeatedly is a no-op after the first call.
pub struct Subscription {
    id: String,
    topic: String,
    registry: ConnectionRegistry,
    receiver: mpsc::Receiver<Envelope>,
    closed: bool,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receives the next envelope, or `None` once closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.closed {
            return None;
        }
        self.receiver.recv().await
    }

    /// Detaches from the registry. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.receiver.close();
        self.registry.detach(&self.topic, &self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

// Monotonic-enough id source; collisions across a process lifetime are
// not a correctness concern because ids are only compared within one
// topic entry.
fn next_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{:x}_{}", nanos, COUNTER.fetch_add(1, Ordering::Relaxed))
}
