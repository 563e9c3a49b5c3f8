use tonic::Status;

use super::{authorize, internal, qos, BridgeService};
use crate::namespace;
use crate::pb;
use crate::util;

impl BridgeService {
    pub(super) async fn handle_publish(
        &self,
        req: pb::PublishRequest,
    ) -> Result<pb::PublishResponse, Status> {
        authorize(&req.user_id)?;
        let qos = qos(req.qos)?;

        let violations = namespace::validate_topic(&req.topic, false);
        if !violations.is_empty() {
            return Err(Status::invalid_argument(violations.join("; ")));
        }

        let wire_topic = namespace::isolate(&req.user_id, &req.topic);
        self.broker
            .publish(&wire_topic, &req.payload, qos, req.retained)
            .await
            .map_err(internal)?;

        self.record_publish(&req.user_id, &req.topic, &req.session_id, 1);
        self.audit(&req.user_id, "publish", &[("topic", &req.topic)]);

        Ok(pb::PublishResponse {
            success: true,
            message_id: util::message_id(),
            message: "message published".to_owned(),
        })
    }

    /// Publishes message-by-message, never short-circuiting: every input ends
    /// up either as a generated message id or as an error string, in input
    /// order.
    pub(super) async fn handle_publish_batch(
        &self,
        req: pb::PublishBatchRequest,
    ) -> Result<pb::PublishBatchResponse, Status> {
        authorize(&req.user_id)?;

        let mut message_ids = Vec::new();
        let mut errors = Vec::new();

        for (index, message) in req.messages.iter().enumerate() {
            match self.publish_batch_entry(&req.user_id, message).await {
                Ok(message_id) => message_ids.push(message_id),
                Err(error) => errors.push(format!("message {index} ({}): {error}", message.topic)),
            }
        }

        let published_count = message_ids.len() as u32;
        let failed_count = errors.len() as u32;
        self.record_publish_counts(&req.user_id, &req.session_id, u64::from(published_count));
        self.audit(
            &req.user_id,
            "publish_batch",
            &[
                ("published", &published_count.to_string()),
                ("failed", &failed_count.to_string()),
            ],
        );

        Ok(pb::PublishBatchResponse {
            success: failed_count == 0,
            published_count,
            failed_count,
            message_ids,
            errors,
        })
    }

    pub(super) async fn handle_publish_json(
        &self,
        req: pb::PublishJsonRequest,
    ) -> Result<pb::PublishResponse, Status> {
        authorize(&req.user_id)?;
        let qos = qos(req.qos)?;

        let violations = namespace::validate_topic(&req.topic, false);
        if !violations.is_empty() {
            return Err(Status::invalid_argument(violations.join("; ")));
        }

        let value: serde_json::Value = serde_json::from_str(&req.json_payload)
            .map_err(|e| Status::invalid_argument(format!("payload is not valid JSON: {e}")))?;
        let payload = serde_json::to_vec(&value)
            .map_err(|e| Status::invalid_argument(format!("unable to serialize payload: {e}")))?;

        let wire_topic = namespace::isolate(&req.user_id, &req.topic);
        self.broker
            .publish(&wire_topic, &payload, qos, req.retained)
            .await
            .map_err(internal)?;

        self.record_publish(&req.user_id, &req.topic, &req.session_id, 1);
        self.audit(&req.user_id, "publish_json", &[("topic", &req.topic)]);

        Ok(pb::PublishResponse {
            success: true,
            message_id: util::message_id(),
            message: "message published".to_owned(),
        })
    }

    async fn publish_batch_entry(
        &self,
        user_id: &str,
        message: &pb::BatchMessage,
    ) -> Result<String, String> {
        let violations = namespace::validate_topic(&message.topic, false);
        if !violations.is_empty() {
            return Err(violations.join("; "));
        }
        let qos = qos(message.qos).map_err(|s| s.message().to_owned())?;

        let wire_topic = namespace::isolate(user_id, &message.topic);
        self.broker
            .publish(&wire_topic, &message.payload, qos, message.retained)
            .await
            .map_err(|e| e.to_string())?;

        self.registry.record_publish(user_id, &message.topic);
        Ok(util::message_id())
    }

    fn record_publish(&self, user_id: &str, topic: &str, session_id: &str, count: u64) {
        self.registry.record_publish(user_id, topic);
        self.record_publish_counts(user_id, session_id, count);
    }

    fn record_publish_counts(&self, user_id: &str, session_id: &str, count: u64) {
        if !session_id.is_empty() && count > 0 {
            self.registry.record_session_sent(user_id, session_id, count);
        }
    }
}
