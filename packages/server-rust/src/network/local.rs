//! In-process message bus.
//!
//! `LocalBus` implements [`Transport`] entirely in memory: each subscription
//! owns a bounded mpsc channel and publishing fans a message out to every
//! subscription whose pattern matches. A full subscriber queue drops the
//! message for that subscriber only (slow-consumer semantics), so a publisher
//! never blocks on a reader. Dropping a subscription removes its entry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::bus::{is_valid_pattern, is_valid_subject, subject_matches, BusMessage, Subscription};
use super::config::BusConfig;
use super::TransportError;
use crate::traits::Transport;

#[derive(Debug)]
struct SubscriptionEntry {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

/// Thread-safe in-memory bus.
#[derive(Debug)]
pub struct LocalBus {
    subscriptions: Arc<DashMap<u64, SubscriptionEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

impl LocalBus {
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            capacity: config.subscription_capacity.max(1),
        }
    }

    /// Closes the bus: every subscription ends and further calls fail with
    /// [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        if !is_valid_pattern(pattern) {
            return Err(TransportError::InvalidSubject(pattern.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscriptions.insert(
            id,
            SubscriptionEntry {
                pattern: pattern.to_string(),
                tx,
            },
        );
        debug!(pattern, id, "subscribed");

        let registry: Weak<DashMap<u64, SubscriptionEntry>> = Arc::downgrade(&self.subscriptions);
        Ok(Subscription::new(pattern, rx).on_drop(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(&id);
            }
        }))
    }

    async fn publish(&self, message: BusMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        if !is_valid_subject(&message.subject) {
            return Err(TransportError::InvalidSubject(message.subject));
        }

        for entry in self.subscriptions.iter() {
            if !subject_matches(&entry.pattern, &message.subject) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        pattern = %entry.pattern,
                        subject = %message.subject,
                        "slow consumer, dropping message"
                    );
                }
                // Being dropped right now; its hook removes the entry.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    fn new_inbox(&self) -> String {
        format!("_INBOX.{}", Uuid::new_v4().simple())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.ensure_open()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::network::request;

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let bus = LocalBus::default();
        let mut rooms = bus.subscribe("event.myapp.rooms.>").await.unwrap();
        let mut other = bus.subscribe("event.other.>").await.unwrap();

        bus.publish(BusMessage::new("event.myapp.rooms.query", "{}"))
            .await
            .unwrap();

        let msg = rooms.next().await.unwrap();
        assert_eq!(msg.subject, "event.myapp.rooms.query");
        assert!(other.try_next().is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_is_removed() {
        let bus = LocalBus::default();
        let sub = bus.subscribe("a.b").await.unwrap();
        assert_eq!(bus.subscription_count(), 1);
        drop(sub);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn inboxes_do_not_accumulate() {
        let bus = std::sync::Arc::new(LocalBus::default());
        let _events = bus.subscribe("event.>").await.unwrap();

        for _ in 0..100 {
            let inbox = bus.new_inbox();
            drop(bus.subscribe(&inbox).await.unwrap());
        }
        for _ in 0..50 {
            let err = request(bus.as_ref(), "nobody.home", "x", Duration::from_millis(1))
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::Timeout { .. }));
        }

        bus.publish(BusMessage::new("event.x", "{}")).await.unwrap();
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn full_subscriber_drops_without_blocking() {
        let bus = LocalBus::new(&BusConfig {
            subscription_capacity: 1,
            ..BusConfig::default()
        });
        let mut sub = bus.subscribe("a.b").await.unwrap();

        bus.publish(BusMessage::new("a.b", "1")).await.unwrap();
        bus.publish(BusMessage::new("a.b", "2")).await.unwrap();

        assert_eq!(&sub.next().await.unwrap().payload[..], b"1");
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_fails_calls() {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe("a.>").await.unwrap();
        bus.close();

        assert!(sub.next().await.is_none());
        assert_eq!(bus.ping().await, Err(TransportError::Closed));
        assert!(bus.subscribe("a.b").await.is_err());
        assert!(bus.publish(BusMessage::new("a.b", "")).await.is_err());
    }

    #[tokio::test]
    async fn invalid_subjects_are_rejected() {
        let bus = LocalBus::default();
        assert!(matches!(
            bus.subscribe("a.>.b").await,
            Err(TransportError::InvalidSubject(_))
        ));
        assert!(matches!(
            bus.publish(BusMessage::new("a.*", "")).await,
            Err(TransportError::InvalidSubject(_))
        ));
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let bus = std::sync::Arc::new(LocalBus::default());
        let mut responder = bus.subscribe("echo").await.unwrap();

        let server = std::sync::Arc::clone(&bus);
        tokio::spawn(async move {
            let msg = responder.next().await.unwrap();
            let reply = msg.reply.unwrap();
            server
                .publish(BusMessage::new(reply, msg.payload))
                .await
                .unwrap();
        });

        let reply = request(bus.as_ref(), "echo", "ping", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&reply.payload[..], b"ping");
    }

    #[tokio::test]
    async fn request_without_responder_times_out() {
        let bus = LocalBus::default();
        let err = request(&bus, "nobody.home", "x", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
