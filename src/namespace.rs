//! Tenant topic namespace and device topic classification.
//!
//! Every user-visible topic is rewritten to `user-{user_id}/{topic}` before it
//! reaches the broker and rewritten back before it reaches a subscriber.
//! Device and notification topics are a shared namespace and travel verbatim.

use crate::pb;

pub const ISOLATION_PREFIX: &str = "user-";

/// Default topic set watched by the device-message stream.
pub const DEVICE_TOPICS: &[&str] = &[
    "devices/+/telemetry",
    "devices/+/status",
    "devices/+/auth",
    "devices/+/registration",
    "devices/+/commands/response",
];

/// Notification topics included in the device-message stream defaults but not
/// in the webhook listener defaults.
pub const NOTIFICATION_TOPICS: &[&str] = &["notifications/users/+/ack", "notifications/system/+"];

pub fn isolate(user_id: &str, topic: &str) -> String {
    format!("{ISOLATION_PREFIX}{user_id}/{topic}")
}

/// Trims the `user-{user_id}/` prefix from a wire topic. Topics outside the
/// caller's namespace are returned unchanged.
pub fn deisolate<'a>(user_id: &str, wire_topic: &'a str) -> &'a str {
    let prefix = format!("{ISOLATION_PREFIX}{user_id}/");
    wire_topic.strip_prefix(&prefix).unwrap_or(wire_topic)
}

/// Classification of device traffic by topic shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Telemetry,
    Status,
    Auth,
    Registration,
    CommandResponse,
    NotificationAck,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Telemetry => "TELEMETRY",
            MessageKind::Status => "STATUS",
            MessageKind::Auth => "AUTH",
            MessageKind::Registration => "REGISTRATION",
            MessageKind::CommandResponse => "COMMAND_RESPONSE",
            MessageKind::NotificationAck => "NOTIFICATION_ACK",
            MessageKind::Unknown => "UNKNOWN",
        }
    }
}

impl From<MessageKind> for pb::DeviceMessageType {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Telemetry => pb::DeviceMessageType::Telemetry,
            MessageKind::Status => pb::DeviceMessageType::Status,
            MessageKind::Auth => pb::DeviceMessageType::Auth,
            MessageKind::Registration => pb::DeviceMessageType::Registration,
            MessageKind::CommandResponse => pb::DeviceMessageType::CommandResponse,
            MessageKind::NotificationAck => pb::DeviceMessageType::NotificationAck,
            MessageKind::Unknown => pb::DeviceMessageType::Unknown,
        }
    }
}

impl From<pb::DeviceMessageType> for MessageKind {
    fn from(kind: pb::DeviceMessageType) -> Self {
        match kind {
            pb::DeviceMessageType::Telemetry => MessageKind::Telemetry,
            pb::DeviceMessageType::Status => MessageKind::Status,
            pb::DeviceMessageType::Auth => MessageKind::Auth,
            pb::DeviceMessageType::Registration => MessageKind::Registration,
            pb::DeviceMessageType::CommandResponse => MessageKind::CommandResponse,
            pb::DeviceMessageType::NotificationAck => MessageKind::NotificationAck,
            pb::DeviceMessageType::Unknown => MessageKind::Unknown,
        }
    }
}

/// Maps a device topic to its message kind. First match wins.
pub fn classify_device_topic(topic: &str) -> MessageKind {
    if topic.contains("/telemetry") {
        MessageKind::Telemetry
    } else if topic.contains("/status") {
        MessageKind::Status
    } else if topic.contains("/auth") {
        MessageKind::Auth
    } else if topic.contains("/registration") {
        MessageKind::Registration
    } else if topic.contains("/commands/response") {
        MessageKind::CommandResponse
    } else if topic.contains("/ack") {
        MessageKind::NotificationAck
    } else {
        MessageKind::Unknown
    }
}

/// Pulls the device id out of a device or notification topic.
///
/// `devices/{id}/...` yields `{id}`; `notifications/users/{id}/...` and
/// `notifications/system/{id}/...` yield `{id}`; anything else is `unknown`.
pub fn extract_device_id(topic: &str) -> &str {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["devices", id, ..] => id,
        ["notifications", "users", id, ..] => id,
        ["notifications", "system", id, ..] => id,
        _ => "unknown",
    }
}

/// Structural topic validation. Returns the list of violations; an empty list
/// means the topic is acceptable.
pub fn validate_topic(topic: &str, allow_wildcards: bool) -> Vec<String> {
    let mut errors = Vec::new();
    if topic.is_empty() {
        errors.push("topic must not be empty".to_owned());
    }
    if topic.contains(' ') {
        errors.push("topic must not contain spaces".to_owned());
    }
    if !allow_wildcards && (topic.contains('+') || topic.contains('#')) {
        errors.push("wildcards are not allowed in this topic".to_owned());
    }
    errors
}
