use std::sync::Arc;

use anyhow::{Context, Result};
use tonic::transport::Server;

use mqtt_bridge::audit::{AuditSink, HttpAuditSink};
use mqtt_bridge::broker::RumqttBroker;
use mqtt_bridge::config::BridgeConfig;
use mqtt_bridge::pb::mqtt_bridge_server::MqttBridgeServer;
use mqtt_bridge::registry::Registry;
use mqtt_bridge::service::BridgeService;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rumqtt=warn,info"))
        .init();

    let config = BridgeConfig::from_env()?;
    log::info!("Connecting to MQTT broker at {}", config.broker_url);
    let broker = RumqttBroker::start(config.mqtt_options()?);

    let registry = Arc::new(Registry::new());
    let audit: Option<Arc<dyn AuditSink>> = config
        .audit_sink_url
        .clone()
        .map(|url| Arc::new(HttpAuditSink::new(url)) as Arc<dyn AuditSink>);

    let service = BridgeService::new(broker.clone(), registry, audit);

    log::info!("MQTT bridge listening on {}", config.listen_addr);
    Server::builder()
        .add_service(MqttBridgeServer::new(service))
        .serve_with_shutdown(config.listen_addr, shutdown_signal())
        .await
        .context("gRPC server failed")?;

    // In-flight calls have drained; close the broker connection last.
    log::info!("Shutting down");
    broker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    log::error!("Unable to install SIGTERM handler: {e}");
                    _ = interrupt.await;
                    return;
                }
            };
        tokio::select! {
            _ = interrupt => log::info!("Received interrupt"),
            _ = terminate.recv() => log::info!("Received terminate"),
        }
    }

    #[cfg(not(unix))]
    {
        _ = interrupt.await;
        log::info!("Received interrupt");
    }
}
