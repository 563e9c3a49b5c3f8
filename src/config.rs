//! Environment-driven process configuration.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rumqttc::MqttOptions;
use uuid::Uuid;

const DEFAULT_BROKER_URL: &str = "mqtt://localhost:1883";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50053";
const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub broker_url: String,
    pub listen_addr: SocketAddr,
    pub audit_sink_url: Option<String>,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        let broker_url =
            env::var("MQTT_BROKER_URL").unwrap_or_else(|_| DEFAULT_BROKER_URL.to_owned());
        let listen_addr = env::var("GRPC_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_owned())
            .parse()
            .context("Unable to parse GRPC_LISTEN_ADDR as a socket address")?;
        let audit_sink_url = env::var("AUDIT_SINK_URL").ok().filter(|url| !url.is_empty());

        Ok(BridgeConfig {
            broker_url,
            listen_addr,
            audit_sink_url,
        })
    }

    /// MQTT client options for the configured broker. Each process gets a
    /// fresh client id so replicas never steal each other's broker session.
    pub fn mqtt_options(&self) -> Result<MqttOptions> {
        let (host, port) = parse_broker_url(&self.broker_url)?;
        let client_id = format!("mqtt-bridge-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        Ok(options)
    }
}

fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    if rest.is_empty() {
        bail!("Broker URL {url:?} does not contain a host");
    }

    match rest.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("Unable to parse broker port in {url:?}"))?;
            Ok((host.to_owned(), port))
        }
        None => Ok((rest.to_owned(), DEFAULT_MQTT_PORT)),
    }
}
