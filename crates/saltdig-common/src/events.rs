//! In-process topic-keyed pub/sub feeding the SSE streams.
//!
//! Delivery is best-effort and synchronous to the emitter. A listener
//! that panics is isolated: the panic is caught and logged, and the
//! remaining listeners still run. The bus holds no durable state and is
//! rebuilt on process restart.

use saltdig_types::MarketEvent;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&MarketEvent) + Send + Sync>;
type TopicMap = HashMap<String, HashMap<u64, Listener>>;

pub struct EventBus {
    topics: Arc<RwLock<TopicMap>>,
    next_token: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a listener on a topic. Dropping the returned
    /// [`Subscription`] (or calling `unsubscribe`) removes it.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        listener: impl Fn(&MarketEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.clone())
            .or_default()
            .insert(token, Arc::new(listener));

        debug!(topic = %topic, token, "Listener subscribed");

        Subscription {
            topics: Arc::downgrade(&self.topics),
            topic,
            token,
        }
    }

    /// Deliver an event to every listener on the topic, synchronously.
    pub fn emit(&self, topic: &str, event: MarketEvent) {
        let listeners: Vec<Listener> = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            match topics.get(topic) {
                Some(map) => map.values().cloned().collect(),
                None => return,
            }
        };

        debug!(
            topic = %topic,
            event_type = event.event_type(),
            listeners = listeners.len(),
            "Emitting event"
        );

        for listener in listeners {
            // One misbehaving listener must not take down the emitter
            // or starve its peers.
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(
                    topic = %topic,
                    event_type = event.event_type(),
                    "Listener panicked during delivery"
                );
            }
        }
    }

    /// Number of listeners currently registered on a topic.
    pub fn listener_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|m| m.len()).unwrap_or(0)
    }
}

/// Handle tying a listener's lifetime to its holder. Removes the
/// listener on drop; empty topics are pruned.
pub struct Subscription {
    topics: Weak<RwLock<TopicMap>>,
    topic: String,
    token: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(topics) = self.topics.upgrade() {
            let mut topics = topics.write().unwrap_or_else(|e| e.into_inner());
            if let Some(map) = topics.get_mut(&self.topic) {
                map.remove(&self.token);
                if map.is_empty() {
                    topics.remove(&self.topic);
                }
            }
            debug!(topic = %self.topic, token = self.token, "Listener unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    fn sample_event() -> MarketEvent {
        MarketEvent::Offer {
            offer_id: "offer_1".into(),
            agent_id: "agent_1".into(),
            price: "100".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn delivers_to_matching_topic_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = hits.clone();
        let _sub_a = bus.subscribe("market:a", move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let hits_b = hits.clone();
        let _sub_b = bus.subscribe("market:b", move |_| {
            hits_b.fetch_add(100, Ordering::SeqCst);
        });

        bus.emit("market:a", sample_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = bus.subscribe("market:a", |_| panic!("listener bug"));
        let hits_ok = hits.clone();
        let _ok = bus.subscribe("market:a", move |_| {
            hits_ok.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit("market:a", sample_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_c = hits.clone();
        let sub = bus.subscribe("market:a", move |_| {
            hits_c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count("market:a"), 1);

        drop(sub);
        assert_eq!(bus.listener_count("market:a"), 0);

        bus.emit("market:a", sample_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_without_listeners_is_noop() {
        let bus = EventBus::new();
        bus.emit("market:none", sample_event());
    }
}
