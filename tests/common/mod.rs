//! In-memory broker double and service plumbing shared by the end-to-end
//! tests. No external MQTT broker is needed: published messages are recorded
//! and incoming traffic is injected straight into the installed handlers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mqtt_bridge::broker::{matcher, Broker, BrokerError, MessageHandler, SubscriptionId};
use mqtt_bridge::registry::Registry;
use mqtt_bridge::service::BridgeService;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
}

struct FakeSubscription {
    id: SubscriptionId,
    filter: String,
    handler: MessageHandler,
}

pub struct FakeBroker {
    connected: AtomicBool,
    next_id: AtomicU64,
    published: Mutex<Vec<PublishedMessage>>,
    // One entry per registration, like the real adapter: filters are shared
    // and removal is by id, never by filter string.
    subscriptions: Mutex<Vec<FakeSubscription>>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBroker {
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().expect("lock").clone()
    }

    /// One filter string per live registration, in installation order.
    pub fn subscription_filters(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .expect("lock")
            .iter()
            .map(|s| s.filter.clone())
            .collect()
    }

    pub fn filter_count(&self, filter: &str) -> usize {
        self.subscriptions
            .lock()
            .expect("lock")
            .iter()
            .filter(|s| s.filter == filter)
            .count()
    }

    /// Simulates the broker delivering a message: every registration whose
    /// filter matches the topic is invoked, like the real dispatch loop.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .lock()
            .expect("lock")
            .iter()
            .filter(|s| matcher::filter_matches(&s.filter, topic))
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            _ = handler(topic, payload);
        }
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Transport("broker disconnected".to_owned()));
        }
        self.published.lock().expect("lock").push(PublishedMessage {
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            qos,
            retained,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        _qos: u8,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Transport("broker disconnected".to_owned()));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().expect("lock").push(FakeSubscription {
            id,
            filter: filter.to_owned(),
            handler,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BrokerError> {
        self.subscriptions
            .lock()
            .expect("lock")
            .retain(|s| s.id != subscription);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

pub fn bridge() -> (Arc<FakeBroker>, Arc<Registry>, BridgeService) {
    _ = env_logger::builder().is_test(true).try_init();

    let broker = FakeBroker::new();
    let registry = Arc::new(Registry::new());
    let service = BridgeService::new(broker.clone(), registry.clone(), None);
    (broker, registry, service)
}
