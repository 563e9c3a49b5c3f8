//! The gRPC service: auth gate, unary handlers, and streaming endpoints.
//!
//! Every handler follows the same shape: authorize, translate the tenant
//! namespace where needed, touch the broker and/or registry, build the
//! response. No handler holds the registry lock across a broker call or a
//! stream send.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::Status;

use crate::audit::AuditSink;
use crate::broker::{Broker, BrokerError};
use crate::pb;
use crate::registry::{self, Registry};
use crate::util;
use crate::webhook::WebhookEngine;

mod connection;
mod devices;
mod devstream;
mod publish;
mod rpc;
mod stats;
mod subscribe;
mod topics;
mod webhooks;

pub use devstream::DeviceMessageStream;
pub use subscribe::MessageStream;

pub struct BridgeService {
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    webhooks: WebhookEngine,
    audit: Option<Arc<dyn AuditSink>>,
}

impl BridgeService {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<Registry>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let webhooks = WebhookEngine::new(broker.clone(), registry.clone());
        BridgeService {
            broker,
            registry,
            webhooks,
            audit,
        }
    }

    /// Emits an audit record for a completed operation. Fire-and-forget; a
    /// missing sink drops the record silently.
    fn audit(&self, user_id: &str, operation: &str, extra: &[(&str, &str)]) {
        let Some(sink) = &self.audit else {
            return;
        };
        let mut labels = HashMap::from([
            ("user_id".to_owned(), user_id.to_owned()),
            ("operation".to_owned(), operation.to_owned()),
        ]);
        for (key, value) in extra {
            labels.insert((*key).to_owned(), (*value).to_owned());
        }
        let sink = sink.clone();
        let operation = operation.to_owned();
        tokio::spawn(async move {
            sink.push("mqtt-bridge".to_owned(), "info".to_owned(), operation, labels)
                .await;
        });
    }
}

/// The auth gate. Empty principals short-circuit before any state is touched.
fn authorize(user_id: &str) -> Result<(), Status> {
    if user_id.is_empty() {
        return Err(Status::permission_denied("user id is required"));
    }
    Ok(())
}

fn qos(value: u32) -> Result<u8, Status> {
    u8::try_from(value)
        .ok()
        .filter(|q| *q <= 2)
        .ok_or_else(|| Status::invalid_argument("QoS must be 0, 1, or 2"))
}

fn internal(e: BrokerError) -> Status {
    Status::internal(e.to_string())
}

// Wire conversions
// --------------------------------------------------------------------------------

fn device_status_to_proto(status: registry::DeviceStatus) -> pb::DeviceStatus {
    match status {
        registry::DeviceStatus::Unknown => pb::DeviceStatus::Unknown,
        registry::DeviceStatus::Online => pb::DeviceStatus::Online,
        registry::DeviceStatus::Offline => pb::DeviceStatus::Offline,
    }
}

fn device_status_from_proto(value: pb::DeviceStatus) -> registry::DeviceStatus {
    match value {
        pb::DeviceStatus::Unknown => registry::DeviceStatus::Unknown,
        pb::DeviceStatus::Online => registry::DeviceStatus::Online,
        pb::DeviceStatus::Offline => registry::DeviceStatus::Offline,
    }
}

fn device_to_proto(device: &registry::Device) -> pb::Device {
    pb::Device {
        device_id: device.device_id.clone(),
        name: device.name.clone(),
        device_type: device.device_type.clone(),
        user_id: device.user_id.clone(),
        organization_id: device.organization_id.clone(),
        status: device_status_to_proto(device.status) as i32,
        registered_at_ms: util::to_unix_ms(device.registered_at),
        last_seen_ms: util::to_unix_ms(device.last_seen),
        metadata: device.metadata.clone(),
        subscribed_topics: device.subscribed_topics.clone(),
        messages_sent: device.messages_sent,
        messages_received: device.messages_received,
    }
}

fn topic_to_proto(state: &registry::TopicState) -> pb::TopicInfo {
    pb::TopicInfo {
        topic: state.topic.clone(),
        user_id: state.user_id.clone(),
        organization_id: state.organization_id.clone(),
        subscriber_count: state.subscriber_count,
        message_count: state.message_count,
        last_message_ms: state.last_message.map(util::to_unix_ms).unwrap_or_default(),
        has_retained: state.has_retained,
    }
}

fn retained_to_proto(message: &registry::RetainedMessage) -> pb::RetainedMessage {
    pb::RetainedMessage {
        topic: message.topic.clone(),
        payload: message.payload.clone(),
        qos: u32::from(message.qos),
        timestamp_ms: util::to_unix_ms(message.timestamp),
        message_id: message.message_id.clone(),
    }
}

fn webhook_to_proto(webhook: &registry::Webhook) -> pb::Webhook {
    pb::Webhook {
        webhook_id: webhook.webhook_id.clone(),
        user_id: webhook.user_id.clone(),
        organization_id: webhook.organization_id.clone(),
        url: webhook.url.clone(),
        topic_patterns: webhook.topic_patterns.clone(),
        device_ids: webhook.device_ids.clone(),
        message_types: webhook
            .message_types
            .iter()
            .map(|kind| pb::DeviceMessageType::from(*kind) as i32)
            .collect(),
        headers: webhook.headers.clone(),
        enabled: webhook.enabled,
        created_at_ms: util::to_unix_ms(webhook.created_at),
        updated_at_ms: util::to_unix_ms(webhook.updated_at),
        success_count: webhook.success_count,
        failure_count: webhook.failure_count,
    }
}
