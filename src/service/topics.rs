use tonic::Status;

use super::{authorize, qos, retained_to_proto, topic_to_proto, BridgeService};
use crate::namespace;
use crate::pb;

impl BridgeService {
    pub(super) fn handle_get_topic_info(
        &self,
        req: pb::GetTopicInfoRequest,
    ) -> Result<pb::TopicInfoResponse, Status> {
        authorize(&req.user_id)?;

        let state = self
            .registry
            .topic_stat(&req.user_id, &req.topic)
            .ok_or_else(|| Status::not_found("topic not found"))?;
        self.audit(&req.user_id, "get_topic_info", &[("topic", &req.topic)]);

        Ok(pb::TopicInfoResponse {
            info: Some(topic_to_proto(&state)),
        })
    }

    pub(super) fn handle_list_topics(
        &self,
        req: pb::ListTopicsRequest,
    ) -> Result<pb::ListTopicsResponse, Status> {
        authorize(&req.user_id)?;

        let pattern = (!req.pattern.is_empty()).then_some(req.pattern.as_str());
        let topics = self
            .registry
            .list_topics(&req.user_id, pattern)
            .iter()
            .map(topic_to_proto)
            .collect();
        self.audit(&req.user_id, "list_topics", &[]);

        Ok(pb::ListTopicsResponse { topics })
    }

    pub(super) fn handle_validate_topic(
        &self,
        req: pb::ValidateTopicRequest,
    ) -> Result<pb::ValidateTopicResponse, Status> {
        authorize(&req.user_id)?;

        let errors = namespace::validate_topic(&req.topic, req.allow_wildcards);
        self.audit(&req.user_id, "validate_topic", &[("topic", &req.topic)]);

        Ok(pb::ValidateTopicResponse {
            valid: errors.is_empty(),
            errors,
        })
    }

    pub(super) fn handle_set_retained_message(
        &self,
        req: pb::SetRetainedMessageRequest,
    ) -> Result<pb::SetRetainedMessageResponse, Status> {
        authorize(&req.user_id)?;
        let qos = qos(req.qos)?;

        let violations = namespace::validate_topic(&req.topic, false);
        if !violations.is_empty() {
            return Err(Status::invalid_argument(violations.join("; ")));
        }

        let message = self
            .registry
            .set_retained(&req.user_id, &req.topic, req.payload, qos);
        self.audit(&req.user_id, "set_retained_message", &[("topic", &req.topic)]);

        Ok(pb::SetRetainedMessageResponse {
            success: true,
            message_id: message.message_id,
        })
    }

    pub(super) fn handle_get_retained_message(
        &self,
        req: pb::GetRetainedMessageRequest,
    ) -> Result<pb::GetRetainedMessageResponse, Status> {
        authorize(&req.user_id)?;

        let message = self.registry.retained(&req.user_id, &req.topic);
        self.audit(&req.user_id, "get_retained_message", &[("topic", &req.topic)]);

        Ok(pb::GetRetainedMessageResponse {
            found: message.is_some(),
            message: message.as_ref().map(retained_to_proto),
        })
    }

    pub(super) fn handle_delete_retained_message(
        &self,
        req: pb::DeleteRetainedMessageRequest,
    ) -> Result<pb::DeleteRetainedMessageResponse, Status> {
        authorize(&req.user_id)?;

        let removed = self.registry.delete_retained(&req.user_id, &req.topic);
        self.audit(&req.user_id, "delete_retained_message", &[("topic", &req.topic)]);

        Ok(pb::DeleteRetainedMessageResponse { success: removed })
    }
}
