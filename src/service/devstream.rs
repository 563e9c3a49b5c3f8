//! Typed device-message stream.
//!
//! Same skeleton as the subscription streamer, but over the shared device
//! topic namespace: subscriptions go in verbatim at QoS 1, and each delivery
//! is classified and tagged with the originating device before the allowlist
//! filters run.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use super::{authorize, internal, BridgeService};
use crate::broker::{MessageHandler, SubscriptionId};
use crate::namespace::{self, MessageKind};
use crate::pb;
use crate::util;

pub type DeviceMessageStream = ReceiverStream<Result<pb::DeviceMessage, Status>>;

const STREAM_QUEUE_CAPACITY: usize = 100;
const STREAM_SEND_BUFFER: usize = 16;
const DEVICE_STREAM_QOS: u8 = 1;

struct DeviceRecord {
    device_id: String,
    kind: MessageKind,
    topic: String,
    payload: Vec<u8>,
    timestamp_ms: i64,
}

impl BridgeService {
    pub(super) async fn handle_subscribe_device_messages(
        &self,
        req: pb::SubscribeDeviceMessagesRequest,
    ) -> Result<DeviceMessageStream, Status> {
        authorize(&req.user_id)?;

        let topics: Vec<String> = if req.topics.is_empty() {
            namespace::DEVICE_TOPICS
                .iter()
                .chain(namespace::NOTIFICATION_TOPICS)
                .map(|topic| (*topic).to_owned())
                .collect()
        } else {
            req.topics.clone()
        };

        let device_ids: HashSet<String> = req.device_ids.iter().cloned().collect();
        let kinds: HashSet<MessageKind> = req.message_types().map(MessageKind::from).collect();

        let (record_tx, mut record_rx) = mpsc::channel::<DeviceRecord>(STREAM_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Result<pb::DeviceMessage, Status>>(STREAM_SEND_BUFFER);

        let mut installed: Vec<(SubscriptionId, String)> = Vec::new();
        for topic in &topics {
            let handler = device_record_handler(device_ids.clone(), kinds.clone(), record_tx.clone());
            match self.broker.subscribe(topic, DEVICE_STREAM_QOS, handler).await {
                Ok(id) => installed.push((id, topic.clone())),
                Err(e) => {
                    for (id, filter) in &installed {
                        if let Err(e) = self.broker.unsubscribe(*id).await {
                            log::warn!("Unable to roll back subscription {filter:?}: {e}");
                        }
                    }
                    return Err(internal(e));
                }
            }
        }
        drop(record_tx);
        log::debug!(
            "User {} watching {} device topics",
            req.user_id,
            installed.len()
        );

        let broker = self.broker.clone();
        let registry = self.registry.clone();
        let user_id = req.user_id.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = out_tx.closed() => break,
                    maybe_record = record_rx.recv() => {
                        let Some(record) = maybe_record else { break };
                        registry.record_device_message(&record.device_id);
                        let message = pb::DeviceMessage {
                            device_id: record.device_id,
                            message_type: pb::DeviceMessageType::from(record.kind) as i32,
                            topic: record.topic,
                            payload: record.payload,
                            qos: u32::from(DEVICE_STREAM_QOS),
                            timestamp_ms: record.timestamp_ms,
                        };
                        if out_tx.send(Ok(message)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            for (id, filter) in &installed {
                if let Err(e) = broker.unsubscribe(*id).await {
                    log::warn!("Unable to remove subscription {filter:?}: {e}");
                }
            }
            log::debug!("Device-message stream for user {user_id} closed");
        });

        Ok(ReceiverStream::new(out_rx))
    }
}

fn device_record_handler(
    device_ids: HashSet<String>,
    kinds: HashSet<MessageKind>,
    tx: mpsc::Sender<DeviceRecord>,
) -> MessageHandler {
    Arc::new(move |topic, payload| {
        let device_id = namespace::extract_device_id(topic);
        if !device_ids.is_empty() && !device_ids.contains(device_id) {
            return Ok(());
        }
        let kind = namespace::classify_device_topic(topic);
        if !kinds.is_empty() && !kinds.contains(&kind) {
            return Ok(());
        }

        let record = DeviceRecord {
            device_id: device_id.to_owned(),
            kind,
            topic: topic.to_owned(),
            payload: payload.to_vec(),
            timestamp_ms: util::now_ms(),
        };
        match tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("Device stream queue full, dropping message on {topic:?}");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(anyhow::anyhow!("device stream closed")),
        }
    })
}
