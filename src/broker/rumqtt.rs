use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet, Publish,
    QoS, SubscribeFilter,
};
use tokio::select;
use tokio_util::sync::CancellationToken;

use super::{matcher, Broker, BrokerError, MessageHandler, SubscriptionId};

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

struct Subscription {
    id: SubscriptionId,
    qos: u8,
    handler: MessageHandler,
}

// Filter -> live registrations. The MQTT-level subscription exists as long as
// at least one registration does.
type SubscriptionTable = Arc<RwLock<HashMap<String, Vec<Subscription>>>>;

fn read_table(table: &SubscriptionTable) -> RwLockReadGuard<'_, HashMap<String, Vec<Subscription>>> {
    table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_table(
    table: &SubscriptionTable,
) -> RwLockWriteGuard<'_, HashMap<String, Vec<Subscription>>> {
    table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// rumqttc-backed [`Broker`]. One event-loop task owns the connection and
/// dispatches incoming publishes to every registration whose filter matches.
pub struct RumqttBroker {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: SubscriptionTable,
    next_id: AtomicU64,
    cancellation: CancellationToken,
}

impl RumqttBroker {
    /// Connects and spawns the event-loop task. Must be called from within a
    /// tokio runtime.
    pub fn start(options: MqttOptions) -> Arc<Self> {
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions: SubscriptionTable = Arc::new(RwLock::new(HashMap::new()));
        let cancellation = CancellationToken::new();

        let driver = EventLoopDriver {
            event_loop,
            client: client.clone(),
            connected: connected.clone(),
            subscriptions: subscriptions.clone(),
            cancellation: cancellation.clone(),
        };
        tokio::spawn(driver.run());

        Arc::new(RumqttBroker {
            client,
            connected,
            subscriptions,
            next_id: AtomicU64::new(0),
            cancellation,
        })
    }

    /// Stops the event loop and sends the MQTT disconnect.
    pub async fn shutdown(&self) {
        // Ignore the error; if the event loop is already gone there is nothing
        // left to disconnect.
        _ = self.client.disconnect().await;
        self.cancellation.cancel();
    }
}

fn qos_level(qos: u8) -> QoS {
    match qos {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

impl From<rumqttc::ClientError> for BrokerError {
    fn from(e: rumqttc::ClientError) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

#[async_trait::async_trait]
impl Broker for RumqttBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> Result<(), BrokerError> {
        self.client
            .publish(topic, qos_level(qos), retained, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: u8,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let effective_qos = {
            let mut table = write_table(&self.subscriptions);
            let entries = table.entry(filter.to_owned()).or_default();
            entries.push(Subscription { id, qos, handler });
            entries.iter().map(|s| s.qos).max().unwrap_or(qos)
        };

        // Re-subscribing a filter the broker already knows is harmless; the
        // subscription keeps the highest QoS requested across registrations.
        if let Err(e) = self.client.subscribe(filter, qos_level(effective_qos)).await {
            let mut table = write_table(&self.subscriptions);
            if let Some(entries) = table.get_mut(filter) {
                entries.retain(|s| s.id != id);
                if entries.is_empty() {
                    table.remove(filter);
                }
            }
            return Err(e.into());
        }
        Ok(id)
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BrokerError> {
        let released_filter = {
            let mut table = write_table(&self.subscriptions);
            let mut released = None;
            for (filter, entries) in table.iter_mut() {
                if let Some(position) = entries.iter().position(|s| s.id == subscription) {
                    entries.remove(position);
                    if entries.is_empty() {
                        released = Some(filter.clone());
                    }
                    break;
                }
            }
            if let Some(filter) = &released {
                table.remove(filter);
            }
            released
        };

        // Other registrations may still ride this filter; only the last one
        // out releases the MQTT subscription.
        if let Some(filter) = released_filter {
            self.client.unsubscribe(filter).await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

struct EventLoopDriver {
    event_loop: rumqttc::EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: SubscriptionTable,
    cancellation: CancellationToken,
}

impl EventLoopDriver {
    async fn run(mut self) {
        loop {
            select! {
                _ = self.cancellation.cancelled() => {
                    log::debug!("Stopping MQTT event loop because of cancellation");
                    break;
                }
                notification = self.event_loop.poll() => self.process(notification).await,
            }
        }
    }

    async fn process(&mut self, notification: Result<Event, ConnectionError>) {
        match notification {
            Ok(Event::Incoming(packet)) => self.process_incoming(packet),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("Stopping MQTT event loop because of disconnect packet");
                self.connected.store(false, Ordering::Relaxed);
                self.cancellation.cancel();
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                log::debug!("Error in MQTT connection: {e:?}");
                self.connected.store(false, Ordering::Relaxed);
                if self.cancellation.is_cancelled() {
                    return;
                }
                // Let rumqttc reconnect on the next poll; back off so a dead
                // broker does not spin the loop.
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }

    fn process_incoming(&mut self, packet: Packet) {
        log::trace!("Received = {:?}", packet);
        match packet {
            Packet::ConnAck(ack) => {
                if ack.code == ConnectReturnCode::Success {
                    self.connected.store(true, Ordering::Relaxed);
                    self.restore_subscriptions();
                } else {
                    log::warn!("Broker refused connection: {:?}", ack.code);
                }
            }
            Packet::Publish(publish) => self.dispatch(publish),
            Packet::Disconnect => self.connected.store(false, Ordering::Relaxed),
            _ => {}
        }
    }

    // The broker forgets subscriptions across reconnects unless the session is
    // persistent, so re-issue everything currently installed.
    fn restore_subscriptions(&self) {
        let filters: Vec<SubscribeFilter> = read_table(&self.subscriptions)
            .iter()
            .map(|(path, entries)| SubscribeFilter {
                path: path.clone(),
                qos: qos_level(entries.iter().map(|s| s.qos).max().unwrap_or(0)),
            })
            .collect();
        if filters.is_empty() {
            return;
        }
        let count = filters.len();
        // try_* keeps the event loop from blocking on its own request channel.
        match self.client.try_subscribe_many(filters) {
            Ok(()) => log::debug!("Restored {count} subscriptions after (re)connect"),
            Err(e) => log::warn!("Unable to restore subscriptions: {e}"),
        }
    }

    fn dispatch(&self, publish: Publish) {
        let handlers: Vec<MessageHandler> = read_table(&self.subscriptions)
            .iter()
            .filter(|(filter, _)| matcher::filter_matches(filter, &publish.topic))
            .flat_map(|(_, entries)| entries.iter().map(|s| s.handler.clone()))
            .collect();

        if handlers.is_empty() {
            log::trace!("No subscriber for message on {:?}", publish.topic);
            return;
        }

        for handler in handlers {
            if let Err(e) = handler(&publish.topic, &publish.payload) {
                log::debug!(
                    "Subscription handler for {:?} rejected message: {e:?}",
                    publish.topic
                );
            }
        }
    }
}
