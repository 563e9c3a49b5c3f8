//! Process-local state: sessions, devices, topic statistics, retained
//! messages, and webhooks, all behind one reader/writer lock.
//!
//! The registry owns every mutation. Reads hand out snapshot copies so no
//! caller can touch the maps outside the lock, and no method performs I/O
//! while holding it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::broker::matcher;
use crate::namespace::MessageKind;
use crate::util;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    Forbidden,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub subscriptions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub user_id: String,
    pub organization_id: String,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    pub subscribed_topics: Vec<String>,
    pub messages_sent: u64,
    pub messages_received: u64,
}

#[derive(Debug, Clone)]
pub struct TopicState {
    pub topic: String,
    pub user_id: String,
    pub organization_id: String,
    pub subscriber_count: u32,
    pub message_count: u64,
    pub last_message: Option<DateTime<Utc>>,
    pub has_retained: bool,
}

impl TopicState {
    fn new(user_id: &str, topic: &str) -> Self {
        TopicState {
            topic: topic.to_owned(),
            user_id: user_id.to_owned(),
            organization_id: String::new(),
            subscriber_count: 0,
            message_count: 0,
            last_message: None,
            has_retained: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
}

#[derive(Debug, Clone)]
pub struct Webhook {
    pub webhook_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub url: String,
    pub topic_patterns: Vec<String>,
    pub device_ids: Vec<String>,
    pub message_types: Vec<MessageKind>,
    pub headers: HashMap<String, String>,
    pub secret: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub success_count: u64,
    pub failure_count: u64,
}

struct WebhookEntry {
    webhook: Webhook,
    // Present exactly as long as the listener task runs; unregister cancels
    // it before the entry is dropped.
    cancellation: CancellationToken,
}

/// Per-user aggregate counters for `GetStatistics`.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub total_devices: u64,
    pub online_devices: u64,
    pub devices_by_type: HashMap<String, u64>,
    pub total_topics: u64,
    pub active_sessions: u64,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    devices: HashMap<String, Device>,
    topics: HashMap<String, TopicState>,
    retained: HashMap<String, RetainedMessage>,
    webhooks: HashMap<String, WebhookEntry>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

fn scoped(user_id: &str, topic: &str) -> String {
    format!("{user_id}:{topic}")
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Sessions
    // --------------------------------------------------------------------------------

    pub fn create_session(&self, user_id: &str, client_id: &str) -> Session {
        let session = Session {
            session_id: format!("session-{client_id}-{}", util::timestamp_nanos()),
            user_id: user_id.to_owned(),
            client_id: client_id.to_owned(),
            connected_at: Utc::now(),
            messages_sent: 0,
            messages_received: 0,
            subscriptions: Vec::new(),
        };
        self.write()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Removes the caller's session. Idempotent; sessions of other users are
    /// treated as absent.
    pub fn drop_session(&self, user_id: &str, session_id: &str) -> bool {
        let mut inner = self.write();
        match inner.sessions.get(session_id) {
            Some(session) if session.user_id == user_id => {
                inner.sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn session(&self, user_id: &str, session_id: &str) -> Option<Session> {
        self.read()
            .sessions
            .get(session_id)
            .filter(|s| s.user_id == user_id)
            .cloned()
    }

    pub fn record_session_sent(&self, user_id: &str, session_id: &str, count: u64) {
        if let Some(session) = self.write().sessions.get_mut(session_id) {
            if session.user_id == user_id {
                session.messages_sent += count;
            }
        }
    }

    pub fn record_session_received(&self, user_id: &str, session_id: &str) {
        if let Some(session) = self.write().sessions.get_mut(session_id) {
            if session.user_id == user_id {
                session.messages_received += 1;
            }
        }
    }

    pub fn add_session_subscriptions(&self, user_id: &str, session_id: &str, topics: &[String]) {
        if let Some(session) = self.write().sessions.get_mut(session_id) {
            if session.user_id == user_id {
                for topic in topics {
                    if !session.subscriptions.contains(topic) {
                        session.subscriptions.push(topic.clone());
                    }
                }
            }
        }
    }

    /// Removes the named filters from the session's subscription list and
    /// returns how many were actually present.
    pub fn remove_session_subscriptions(
        &self,
        user_id: &str,
        session_id: &str,
        topics: &[String],
    ) -> usize {
        if let Some(session) = self.write().sessions.get_mut(session_id) {
            if session.user_id == user_id {
                let before = session.subscriptions.len();
                session.subscriptions.retain(|t| !topics.contains(t));
                return before - session.subscriptions.len();
            }
        }
        0
    }

    // Devices
    // --------------------------------------------------------------------------------

    pub fn insert_device(&self, device: Device) {
        self.write().devices.insert(device.device_id.clone(), device);
    }

    /// Ownership is enforced as non-existence: a foreign device reads and
    /// removes as if it were absent.
    pub fn device(&self, user_id: &str, device_id: &str) -> Option<Device> {
        self.read()
            .devices
            .get(device_id)
            .filter(|d| d.user_id == user_id)
            .cloned()
    }

    pub fn remove_device(&self, user_id: &str, device_id: &str) -> bool {
        let mut inner = self.write();
        match inner.devices.get(device_id) {
            Some(device) if device.user_id == user_id => {
                inner.devices.remove(device_id);
                true
            }
            _ => false,
        }
    }

    pub fn list_devices(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
        status: Option<DeviceStatus>,
    ) -> Vec<Device> {
        self.read()
            .devices
            .values()
            .filter(|d| d.user_id == user_id)
            .filter(|d| organization_id.map_or(true, |org| d.organization_id == org))
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect()
    }

    /// Sets the status and merges the metadata patch key-wise; existing keys
    /// not named in the patch are kept. Also refreshes `last_seen`.
    pub fn update_device_status(
        &self,
        user_id: &str,
        device_id: &str,
        status: DeviceStatus,
        metadata: &HashMap<String, String>,
    ) -> Option<Device> {
        let mut inner = self.write();
        let device = inner
            .devices
            .get_mut(device_id)
            .filter(|d| d.user_id == user_id)?;
        device.status = status;
        device.last_seen = Utc::now();
        for (key, value) in metadata {
            device.metadata.insert(key.clone(), value.clone());
        }
        Some(device.clone())
    }

    /// Counts traffic observed from a device on the shared device topics.
    pub fn record_device_message(&self, device_id: &str) {
        if let Some(device) = self.write().devices.get_mut(device_id) {
            device.messages_sent += 1;
            device.last_seen = Utc::now();
        }
    }

    // Topic statistics
    // --------------------------------------------------------------------------------

    pub fn record_publish(&self, user_id: &str, topic: &str) {
        let mut inner = self.write();
        let state = inner
            .topics
            .entry(scoped(user_id, topic))
            .or_insert_with(|| TopicState::new(user_id, topic));
        state.message_count += 1;
        state.last_message = Some(Utc::now());
    }

    pub fn adjust_subscribers(&self, user_id: &str, topic: &str, delta: i64) {
        let mut inner = self.write();
        let state = inner
            .topics
            .entry(scoped(user_id, topic))
            .or_insert_with(|| TopicState::new(user_id, topic));
        state.subscriber_count = (i64::from(state.subscriber_count) + delta).max(0) as u32;
    }

    pub fn topic_stat(&self, user_id: &str, topic: &str) -> Option<TopicState> {
        self.read().topics.get(&scoped(user_id, topic)).cloned()
    }

    pub fn list_topics(&self, user_id: &str, pattern: Option<&str>) -> Vec<TopicState> {
        self.read()
            .topics
            .values()
            .filter(|t| t.user_id == user_id)
            .filter(|t| pattern.map_or(true, |p| matcher::filter_matches(p, &t.topic)))
            .cloned()
            .collect()
    }

    // Retained messages
    // --------------------------------------------------------------------------------

    pub fn set_retained(&self, user_id: &str, topic: &str, payload: Vec<u8>, qos: u8) -> RetainedMessage {
        let message = RetainedMessage {
            topic: topic.to_owned(),
            payload,
            qos,
            timestamp: Utc::now(),
            message_id: util::message_id(),
        };
        let mut inner = self.write();
        inner.retained.insert(scoped(user_id, topic), message.clone());
        inner
            .topics
            .entry(scoped(user_id, topic))
            .or_insert_with(|| TopicState::new(user_id, topic))
            .has_retained = true;
        message
    }

    pub fn retained(&self, user_id: &str, topic: &str) -> Option<RetainedMessage> {
        self.read().retained.get(&scoped(user_id, topic)).cloned()
    }

    pub fn delete_retained(&self, user_id: &str, topic: &str) -> bool {
        let mut inner = self.write();
        let removed = inner.retained.remove(&scoped(user_id, topic)).is_some();
        if removed {
            if let Some(state) = inner.topics.get_mut(&scoped(user_id, topic)) {
                state.has_retained = false;
            }
        }
        removed
    }

    // Webhooks
    // --------------------------------------------------------------------------------

    pub fn insert_webhook(&self, webhook: Webhook, cancellation: CancellationToken) {
        self.write().webhooks.insert(
            webhook.webhook_id.clone(),
            WebhookEntry {
                webhook,
                cancellation,
            },
        );
    }

    pub fn webhook(&self, webhook_id: &str) -> Option<Webhook> {
        self.read()
            .webhooks
            .get(webhook_id)
            .map(|entry| entry.webhook.clone())
    }

    /// Cancels the listener and drops the entry. Unlike device reads, a
    /// foreign webhook is reported as `Forbidden`: webhook existence is the
    /// caller's own data.
    pub fn remove_webhook(&self, user_id: &str, webhook_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let entry = inner.webhooks.get(webhook_id).ok_or(RegistryError::NotFound)?;
        if entry.webhook.user_id != user_id {
            return Err(RegistryError::Forbidden);
        }
        entry.cancellation.cancel();
        inner.webhooks.remove(webhook_id);
        Ok(())
    }

    pub fn list_webhooks(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
        include_disabled: bool,
    ) -> Vec<Webhook> {
        self.read()
            .webhooks
            .values()
            .map(|entry| &entry.webhook)
            .filter(|w| w.user_id == user_id)
            .filter(|w| organization_id.map_or(true, |org| w.organization_id == org))
            .filter(|w| include_disabled || w.enabled)
            .cloned()
            .collect()
    }

    pub fn record_webhook_result(&self, webhook_id: &str, success: bool) {
        if let Some(entry) = self.write().webhooks.get_mut(webhook_id) {
            if success {
                entry.webhook.success_count += 1;
            } else {
                entry.webhook.failure_count += 1;
            }
            entry.webhook.updated_at = Utc::now();
        }
    }

    // Aggregates
    // --------------------------------------------------------------------------------

    pub fn statistics(&self, user_id: &str, organization_id: Option<&str>) -> Statistics {
        let inner = self.read();
        let mut stats = Statistics::default();

        for device in inner.devices.values() {
            if device.user_id != user_id {
                continue;
            }
            if let Some(org) = organization_id {
                if device.organization_id != org {
                    continue;
                }
            }
            stats.total_devices += 1;
            if device.status == DeviceStatus::Online {
                stats.online_devices += 1;
            }
            *stats
                .devices_by_type
                .entry(device.device_type.clone())
                .or_insert(0) += 1;
        }

        stats.total_topics = inner.topics.values().filter(|t| t.user_id == user_id).count() as u64;
        stats.active_sessions = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .count() as u64;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let registry = Registry::new();
        let session = registry.create_session("u1", "c1");
        assert!(session.session_id.starts_with("session-c1-"));
        assert!(registry.session("u1", &session.session_id).is_some());

        // A different user cannot see or drop it.
        assert!(registry.session("u2", &session.session_id).is_none());
        assert!(!registry.drop_session("u2", &session.session_id));

        assert!(registry.drop_session("u1", &session.session_id));
        assert!(!registry.drop_session("u1", &session.session_id));
        assert!(registry.session("u1", &session.session_id).is_none());
    }

    #[test]
    fn session_ids_are_unique() {
        let registry = Registry::new();
        let a = registry.create_session("u1", "c1");
        let b = registry.create_session("u1", "c1");
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn session_subscription_bookkeeping() {
        let registry = Registry::new();
        let session = registry.create_session("u1", "c1");
        registry.add_session_subscriptions(
            "u1",
            &session.session_id,
            &["a/#".to_owned(), "b/+".to_owned()],
        );

        // Removal reports how many filters were actually present.
        let removed = registry.remove_session_subscriptions(
            "u1",
            &session.session_id,
            &["a/#".to_owned(), "missing".to_owned()],
        );
        assert_eq!(removed, 1);

        let session = registry.session("u1", &session.session_id).expect("session");
        assert_eq!(session.subscriptions, vec!["b/+".to_owned()]);
    }

    fn device(user_id: &str, device_id: &str) -> Device {
        Device {
            device_id: device_id.to_owned(),
            name: "thermostat".to_owned(),
            device_type: "sensor".to_owned(),
            user_id: user_id.to_owned(),
            organization_id: "org1".to_owned(),
            status: DeviceStatus::Offline,
            registered_at: Utc::now(),
            last_seen: Utc::now(),
            metadata: HashMap::from([("hw".to_owned(), "rev2".to_owned())]),
            subscribed_topics: Vec::new(),
            messages_sent: 0,
            messages_received: 0,
        }
    }

    #[test]
    fn device_ownership_is_non_existence() {
        let registry = Registry::new();
        registry.insert_device(device("u1", "d1"));
        assert!(registry.device("u1", "d1").is_some());
        assert!(registry.device("u2", "d1").is_none());
        assert!(!registry.remove_device("u2", "d1"));
        assert!(registry.remove_device("u1", "d1"));
    }

    #[test]
    fn device_metadata_merges_key_wise() {
        let registry = Registry::new();
        registry.insert_device(device("u1", "d1"));

        let patch = HashMap::from([("fw".to_owned(), "1.2".to_owned())]);
        let updated = registry
            .update_device_status("u1", "d1", DeviceStatus::Online, &patch)
            .expect("device exists");

        assert_eq!(updated.status, DeviceStatus::Online);
        assert_eq!(updated.metadata.get("fw").map(String::as_str), Some("1.2"));
        // The pre-existing key survives the patch.
        assert_eq!(updated.metadata.get("hw").map(String::as_str), Some("rev2"));
    }

    #[test]
    fn update_missing_or_foreign_device_fails() {
        let registry = Registry::new();
        registry.insert_device(device("u1", "d1"));
        let patch = HashMap::new();
        assert!(registry
            .update_device_status("u1", "nope", DeviceStatus::Online, &patch)
            .is_none());
        assert!(registry
            .update_device_status("u2", "d1", DeviceStatus::Online, &patch)
            .is_none());
    }

    #[test]
    fn retained_messages_follow_last_write() {
        let registry = Registry::new();
        registry.set_retained("u1", "state", b"A".to_vec(), 0);
        registry.set_retained("u1", "state", b"B".to_vec(), 1);

        let message = registry.retained("u1", "state").expect("retained present");
        assert_eq!(message.payload, b"B");
        assert_eq!(message.qos, 1);
        assert!(registry.topic_stat("u1", "state").expect("stat").has_retained);

        assert!(registry.delete_retained("u1", "state"));
        assert!(registry.retained("u1", "state").is_none());
        assert!(!registry.topic_stat("u1", "state").expect("stat").has_retained);
        assert!(!registry.delete_retained("u1", "state"));
    }

    #[test]
    fn retained_is_scoped_per_user() {
        let registry = Registry::new();
        registry.set_retained("u1", "state", b"A".to_vec(), 0);
        assert!(registry.retained("u2", "state").is_none());
    }

    #[test]
    fn topic_stats_accumulate() {
        let registry = Registry::new();
        registry.record_publish("u1", "a/b");
        registry.record_publish("u1", "a/b");
        registry.adjust_subscribers("u1", "a/b", 1);

        let stat = registry.topic_stat("u1", "a/b").expect("stat present");
        assert_eq!(stat.message_count, 2);
        assert_eq!(stat.subscriber_count, 1);
        assert!(stat.last_message.is_some());

        registry.adjust_subscribers("u1", "a/b", -1);
        registry.adjust_subscribers("u1", "a/b", -1);
        let stat = registry.topic_stat("u1", "a/b").expect("stat present");
        // Never goes negative, even when teardown races registration.
        assert_eq!(stat.subscriber_count, 0);
    }

    fn webhook(user_id: &str, id: &str) -> Webhook {
        Webhook {
            webhook_id: id.to_owned(),
            user_id: user_id.to_owned(),
            organization_id: String::new(),
            url: "http://sink/".to_owned(),
            topic_patterns: Vec::new(),
            device_ids: Vec::new(),
            message_types: Vec::new(),
            headers: HashMap::new(),
            secret: None,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            success_count: 0,
            failure_count: 0,
        }
    }

    #[test]
    fn webhook_removal_cancels_listener_first() {
        let registry = Registry::new();
        let token = CancellationToken::new();
        registry.insert_webhook(webhook("u1", "w1"), token.clone());

        assert!(matches!(
            registry.remove_webhook("u2", "w1"),
            Err(RegistryError::Forbidden)
        ));
        assert!(!token.is_cancelled());

        registry.remove_webhook("u1", "w1").expect("owner removes");
        assert!(token.is_cancelled());
        assert!(registry.webhook("w1").is_none());
        assert!(matches!(
            registry.remove_webhook("u1", "w1"),
            Err(RegistryError::NotFound)
        ));
    }

    #[test]
    fn webhook_counters() {
        let registry = Registry::new();
        registry.insert_webhook(webhook("u1", "w1"), CancellationToken::new());
        registry.record_webhook_result("w1", true);
        registry.record_webhook_result("w1", false);
        registry.record_webhook_result("w1", false);

        let snapshot = registry.webhook("w1").expect("webhook present");
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.failure_count, 2);
    }

    #[test]
    fn statistics_are_tenant_scoped() {
        let registry = Registry::new();
        registry.insert_device(device("u1", "d1"));
        let mut online = device("u1", "d2");
        online.status = DeviceStatus::Online;
        online.device_type = "gateway".to_owned();
        registry.insert_device(online);
        registry.insert_device(device("u2", "d3"));

        registry.record_publish("u1", "a/b");
        registry.create_session("u1", "c1");

        let stats = registry.statistics("u1", None);
        assert_eq!(stats.total_devices, 2);
        assert_eq!(stats.online_devices, 1);
        assert_eq!(stats.devices_by_type.get("sensor"), Some(&1));
        assert_eq!(stats.devices_by_type.get("gateway"), Some(&1));
        assert_eq!(stats.total_topics, 1);
        assert_eq!(stats.active_sessions, 1);

        let stats = registry.statistics("u2", None);
        assert_eq!(stats.total_devices, 1);
        assert_eq!(stats.active_sessions, 0);
    }
}
