//! Fire-and-forget HTTP delivery with HMAC-SHA256 signing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use ring::hmac;
use serde::Serialize;

use crate::registry::{Registry, Webhook};

pub(super) const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
const WEBHOOK_USER_AGENT: &str = "isA-MQTT-Webhook/1.0";

const HEADER_WEBHOOK_ID: HeaderName = HeaderName::from_static("x-webhook-id");
const HEADER_TIMESTAMP: HeaderName = HeaderName::from_static("x-timestamp");
const HEADER_SIGNATURE: HeaderName = HeaderName::from_static("x-webhook-signature");

/// The JSON body posted to the webhook target.
#[derive(Debug, Serialize)]
pub(super) struct Envelope {
    pub webhook_id: String,
    pub device_id: String,
    pub message_type: String,
    pub topic: String,
    pub payload: String,
    pub timestamp: String,
    pub qos: u8,
}

/// Delivers one envelope and books the outcome. 2xx counts as success;
/// anything else, including transport and serialization failures, counts as
/// failure. No retries, no queueing.
pub(super) async fn dispatch(
    http: reqwest::Client,
    registry: Arc<Registry>,
    webhook: Webhook,
    envelope: Envelope,
) {
    let outcome = send(&http, &webhook, &envelope).await;
    if let Err(e) = &outcome {
        log::debug!("Webhook {} delivery failed: {e}", webhook.webhook_id);
    }
    registry.record_webhook_result(&webhook.webhook_id, outcome.is_ok());
}

async fn send(http: &reqwest::Client, webhook: &Webhook, envelope: &Envelope) -> Result<()> {
    let body = serde_json::to_vec(envelope).context("unable to serialize webhook envelope")?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(WEBHOOK_USER_AGENT));
    headers.insert(
        HEADER_WEBHOOK_ID,
        HeaderValue::from_str(&webhook.webhook_id).context("webhook id is not a header value")?,
    );
    headers.insert(
        HEADER_TIMESTAMP,
        HeaderValue::from_str(&envelope.timestamp).context("timestamp is not a header value")?,
    );

    // Caller headers overlay the defaults; last write wins.
    for (name, value) in &webhook.headers {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(name) => name,
            Err(e) => {
                log::warn!("Webhook {}: skipping header {name:?}: {e}", webhook.webhook_id);
                continue;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Webhook {}: skipping header {name:?}: {e}", webhook.webhook_id);
                continue;
            }
        };
        headers.insert(name, value);
    }

    if let Some(secret) = &webhook.secret {
        let signature = sign(secret.as_bytes(), &body);
        headers.insert(
            HEADER_SIGNATURE,
            HeaderValue::from_str(&signature).context("signature is not a header value")?,
        );
    }

    let response = http
        .post(&webhook.url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .context("request failed")?;

    if !response.status().is_success() {
        bail!("endpoint returned status {}", response.status());
    }
    Ok(())
}

/// Lowercase hex HMAC-SHA256 over the request body.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex::encode(hmac::sign(&key, body).as_ref())
}
