//! Capability seam over the MQTT client.
//!
//! The rest of the crate only ever talks to [`Broker`]; the rumqttc-backed
//! implementation lives in [`rumqtt`] and test doubles implement the trait
//! directly.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod matcher;
mod rumqtt;

pub use rumqtt::RumqttBroker;

/// Delivery callback installed with a subscription. Invoked from the broker's
/// dispatch task with the wire topic and raw payload; it must not block. An
/// error means the handler no longer wants the message (for example because
/// its stream has gone away) and is logged by the adapter.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Identifies one installed registration. Many registrations may share a
/// filter (streams and webhook listeners all default onto the same device
/// topics); tearing one down leaves the others delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> Result<(), BrokerError>;

    /// Installs `handler` for every message matching `filter` and returns the
    /// registration's id. Every matching registration is invoked per message.
    async fn subscribe(
        &self,
        filter: &str,
        qos: u8,
        handler: MessageHandler,
    ) -> Result<SubscriptionId, BrokerError>;

    /// Removes one registration. The broker-level subscription is released
    /// only when the last registration on its filter goes away. Unknown ids
    /// are ignored.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;
}
