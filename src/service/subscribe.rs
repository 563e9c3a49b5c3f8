//! Server-streaming subscription bridge.
//!
//! Broker callbacks produce into a bounded per-call queue; a dedicated drainer
//! task forwards onto the gRPC stream. The callback never blocks the broker's
//! dispatch loop: a full queue drops the message. Whatever ends the stream,
//! the drainer removes every broker subscription it installed.

use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use super::{authorize, internal, qos, BridgeService};
use crate::broker::{Broker, MessageHandler, SubscriptionId};
use crate::namespace;
use crate::pb;
use crate::registry::Registry;
use crate::util;

pub type MessageStream = ReceiverStream<Result<pb::MqttMessage, Status>>;

/// Capacity of the per-call delivery queue between broker callbacks and the
/// drainer.
const STREAM_QUEUE_CAPACITY: usize = 100;
const STREAM_SEND_BUFFER: usize = 16;

struct StreamRecord {
    topic: String,
    payload: Vec<u8>,
    qos: u8,
    timestamp_ms: i64,
    message_id: String,
}

impl BridgeService {
    pub(super) async fn handle_subscribe(
        &self,
        req: pb::SubscribeRequest,
    ) -> Result<MessageStream, Status> {
        authorize(&req.user_id)?;
        let qos = qos(req.qos)?;
        self.open_message_stream(req.user_id, req.session_id, vec![(req.topic, qos)])
            .await
    }

    pub(super) async fn handle_subscribe_multiple(
        &self,
        req: pb::SubscribeMultipleRequest,
    ) -> Result<MessageStream, Status> {
        authorize(&req.user_id)?;
        let filters = req
            .filters
            .iter()
            .map(|f| Ok((f.topic.clone(), qos(f.qos)?)))
            .collect::<Result<Vec<_>, Status>>()?;
        self.open_message_stream(req.user_id, req.session_id, filters)
            .await
    }

    async fn open_message_stream(
        &self,
        user_id: String,
        session_id: String,
        filters: Vec<(String, u8)>,
    ) -> Result<MessageStream, Status> {
        if filters.is_empty() {
            return Err(Status::invalid_argument("at least one topic filter is required"));
        }
        for (topic, _) in &filters {
            let violations = namespace::validate_topic(topic, true);
            if !violations.is_empty() {
                return Err(Status::invalid_argument(format!(
                    "filter {topic:?}: {}",
                    violations.join("; ")
                )));
            }
        }

        let (record_tx, mut record_rx) = mpsc::channel::<StreamRecord>(STREAM_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Result<pb::MqttMessage, Status>>(STREAM_SEND_BUFFER);

        let mut installed: Vec<(SubscriptionId, String)> = Vec::new();
        for (topic, qos) in &filters {
            let wire_filter = namespace::isolate(&user_id, topic);
            let handler = record_handler(user_id.clone(), *qos, record_tx.clone());
            match self.broker.subscribe(&wire_filter, *qos, handler).await {
                Ok(id) => installed.push((id, wire_filter)),
                Err(e) => {
                    rollback(self.broker.as_ref(), &installed).await;
                    return Err(internal(e));
                }
            }
        }
        // The handlers own their clones; without this drop the queue would
        // never close after teardown.
        drop(record_tx);

        let topics: Vec<String> = filters.into_iter().map(|(topic, _)| topic).collect();
        for topic in &topics {
            self.registry.adjust_subscribers(&user_id, topic, 1);
        }
        if !session_id.is_empty() {
            self.registry
                .add_session_subscriptions(&user_id, &session_id, &topics);
        }
        log::debug!("User {user_id} subscribed to {} filters", topics.len());

        let broker = self.broker.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    // The peer went away (cancel, deadline, disconnect).
                    _ = out_tx.closed() => break,
                    maybe_record = record_rx.recv() => {
                        let Some(record) = maybe_record else { break };
                        if !session_id.is_empty() {
                            registry.record_session_received(&user_id, &session_id);
                        }
                        let message = pb::MqttMessage {
                            topic: record.topic,
                            payload: record.payload,
                            qos: u32::from(record.qos),
                            timestamp_ms: record.timestamp_ms,
                            message_id: record.message_id,
                        };
                        if out_tx.send(Ok(message)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            teardown(broker.as_ref(), &registry, &user_id, &installed, &topics).await;
        });

        Ok(ReceiverStream::new(out_rx))
    }

    /// Removes filters from the session's subscription list. Broker
    /// registrations belong to the live streams that installed them and go
    /// away with those streams; an RPC-level filter string cannot name one
    /// without tearing down some other caller's registration.
    pub(super) fn handle_unsubscribe(
        &self,
        req: pb::UnsubscribeRequest,
    ) -> Result<pb::UnsubscribeResponse, Status> {
        authorize(&req.user_id)?;

        let unsubscribed = if req.session_id.is_empty() {
            0
        } else {
            self.registry
                .remove_session_subscriptions(&req.user_id, &req.session_id, &req.topics)
                as u32
        };
        self.audit(
            &req.user_id,
            "unsubscribe",
            &[("topics", &req.topics.len().to_string())],
        );

        Ok(pb::UnsubscribeResponse {
            success: true,
            unsubscribed_count: unsubscribed,
            message: format!("unsubscribed from {unsubscribed} of {} topics", req.topics.len()),
        })
    }

    pub(super) fn handle_list_subscriptions(
        &self,
        req: pb::ListSubscriptionsRequest,
    ) -> Result<pb::ListSubscriptionsResponse, Status> {
        authorize(&req.user_id)?;

        // An unknown session reads as an empty list, not an error.
        let topics = self
            .registry
            .session(&req.user_id, &req.session_id)
            .map(|session| session.subscriptions)
            .unwrap_or_default();
        self.audit(&req.user_id, "list_subscriptions", &[("session_id", &req.session_id)]);

        Ok(pb::ListSubscriptionsResponse { topics })
    }
}

fn record_handler(user_id: String, qos: u8, tx: mpsc::Sender<StreamRecord>) -> MessageHandler {
    Arc::new(move |wire_topic, payload| {
        let record = StreamRecord {
            topic: namespace::deisolate(&user_id, wire_topic).to_owned(),
            payload: payload.to_vec(),
            qos,
            timestamp_ms: util::now_ms(),
            message_id: util::message_id(),
        };
        match tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("Subscriber queue full, dropping message on {wire_topic:?}");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(anyhow::anyhow!("subscriber stream closed")),
        }
    })
}

async fn rollback(broker: &dyn Broker, installed: &[(SubscriptionId, String)]) {
    for (id, filter) in installed {
        if let Err(e) = broker.unsubscribe(*id).await {
            log::warn!("Unable to roll back subscription {filter:?}: {e}");
        }
    }
}

async fn teardown(
    broker: &dyn Broker,
    registry: &Registry,
    user_id: &str,
    installed: &[(SubscriptionId, String)],
    topics: &[String],
) {
    for (id, filter) in installed {
        if let Err(e) = broker.unsubscribe(*id).await {
            log::warn!("Unable to remove subscription {filter:?}: {e}");
        }
    }
    for topic in topics {
        registry.adjust_subscribers(user_id, topic, -1);
    }
    log::debug!("Subscription stream for user {user_id} closed");
}
