//! Subscription-to-HTTP bridge.
//!
//! Each registered webhook runs an independent listener under its own
//! cancellation token. The listener watches the webhook's topic set, applies
//! the device-id and message-type allowlists, and fans every match out to a
//! fire-and-forget HTTP dispatch. Delivery is at-most-once with best-effort
//! ordering; outcomes only show up in the webhook's counters.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, MessageHandler, SubscriptionId};
use crate::namespace::{self, MessageKind};
use crate::registry::{Registry, Webhook};

mod dispatch;

pub use dispatch::sign;

const LISTEN_QOS: u8 = 1;

#[derive(Clone)]
pub struct WebhookEngine {
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    http: reqwest::Client,
}

impl WebhookEngine {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<Registry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(dispatch::DISPATCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        WebhookEngine {
            broker,
            registry,
            http,
        }
    }

    /// Stores the webhook and launches its listener. The cancellation token
    /// lives in the registry entry; unregistering cancels it, and the
    /// listener tears its subscriptions down before exiting.
    pub fn register(&self, webhook: Webhook) {
        let cancellation = CancellationToken::new();
        self.registry.insert_webhook(webhook.clone(), cancellation.clone());

        let listener = Listener {
            broker: self.broker.clone(),
            registry: self.registry.clone(),
            http: self.http.clone(),
            webhook,
            cancellation,
        };
        tokio::spawn(listener.run());
    }
}

struct Listener {
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    http: reqwest::Client,
    webhook: Webhook,
    cancellation: CancellationToken,
}

impl Listener {
    async fn run(self) {
        let topics: Vec<String> = if self.webhook.topic_patterns.is_empty() {
            // Device traffic only; notification topics are opt-in by pattern.
            namespace::DEVICE_TOPICS
                .iter()
                .map(|topic| (*topic).to_owned())
                .collect()
        } else {
            self.webhook.topic_patterns.clone()
        };

        let mut installed: Vec<(SubscriptionId, String)> = Vec::new();
        for topic in &topics {
            match self.broker.subscribe(topic, LISTEN_QOS, self.handler()).await {
                Ok(id) => installed.push((id, topic.clone())),
                Err(e) => log::warn!(
                    "Webhook {}: unable to subscribe to {topic:?}: {e}",
                    self.webhook.webhook_id
                ),
            }
        }
        log::debug!(
            "Webhook {} listening on {} topics",
            self.webhook.webhook_id,
            installed.len()
        );

        self.cancellation.cancelled().await;

        for (id, topic) in &installed {
            if let Err(e) = self.broker.unsubscribe(*id).await {
                log::warn!(
                    "Webhook {}: unable to remove subscription {topic:?}: {e}",
                    self.webhook.webhook_id
                );
            }
        }
        log::debug!("Webhook {} listener stopped", self.webhook.webhook_id);
    }

    fn handler(&self) -> MessageHandler {
        let webhook = self.webhook.clone();
        let cancellation = self.cancellation.clone();
        let http = self.http.clone();
        let registry = self.registry.clone();
        let device_ids: HashSet<String> = webhook.device_ids.iter().cloned().collect();
        let kinds: HashSet<MessageKind> = webhook.message_types.iter().copied().collect();

        Arc::new(move |topic, payload| {
            // Unregistration may race a delivery already in flight.
            if cancellation.is_cancelled() {
                return Ok(());
            }
            let device_id = namespace::extract_device_id(topic);
            if !device_ids.is_empty() && !device_ids.contains(device_id) {
                return Ok(());
            }
            let kind = namespace::classify_device_topic(topic);
            if !kinds.is_empty() && !kinds.contains(&kind) {
                return Ok(());
            }

            let envelope = dispatch::Envelope {
                webhook_id: webhook.webhook_id.clone(),
                device_id: device_id.to_owned(),
                message_type: kind.as_str().to_owned(),
                topic: topic.to_owned(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                qos: LISTEN_QOS,
            };
            tokio::spawn(dispatch::dispatch(
                http.clone(),
                registry.clone(),
                webhook.clone(),
                envelope,
            ));
            Ok(())
        })
    }
}
