//! One-shot audit record sink.
//!
//! The bridge emits an audit record for every successful unary operation. The
//! sink is optional; without one the records are silently dropped. Failures
//! never surface to the RPC caller.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn push(&self, stream: String, level: String, message: String, labels: HashMap<String, String>);
}

#[derive(Serialize)]
struct AuditRecord {
    stream: String,
    level: String,
    message: String,
    labels: HashMap<String, String>,
}

/// Posts audit records to an HTTP collector as JSON.
pub struct HttpAuditSink {
    url: String,
    http: reqwest::Client,
}

impl HttpAuditSink {
    pub fn new(url: String) -> Self {
        HttpAuditSink {
            url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AuditSink for HttpAuditSink {
    async fn push(&self, stream: String, level: String, message: String, labels: HashMap<String, String>) {
        let record = AuditRecord {
            stream,
            level,
            message,
            labels,
        };
        if let Err(e) = self.http.post(&self.url).json(&record).send().await {
            log::debug!("Unable to push audit record: {e}");
        }
    }
}
