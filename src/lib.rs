//! gRPC bridge for MQTT brokers.
//!
//! One shared broker connection is multiplexed across many gRPC callers, with
//! per-tenant topic isolation, server-streaming subscriptions, a process-local
//! registry for sessions, devices, topic statistics and retained messages,
//! and a webhook engine that posts signed HTTP callbacks for device traffic.

pub mod audit;
pub mod broker;
pub mod config;
pub mod namespace;
pub mod registry;
pub mod service;
pub mod webhook;

pub(crate) mod util;

/// Generated protocol types for the `mqttbridge.v1` service.
pub mod pb {
    tonic::include_proto!("mqttbridge.v1");
}
