use chrono::Utc;
use tonic::Status;
use uuid::Uuid;

use super::{authorize, webhook_to_proto, BridgeService};
use crate::namespace::MessageKind;
use crate::pb;
use crate::registry::{RegistryError, Webhook};

impl BridgeService {
    pub(super) fn handle_register_webhook(
        &self,
        req: pb::RegisterWebhookRequest,
    ) -> Result<pb::WebhookResponse, Status> {
        authorize(&req.user_id)?;
        if req.url.is_empty() {
            return Err(Status::invalid_argument("webhook URL is required"));
        }
        reqwest::Url::parse(&req.url)
            .map_err(|e| Status::invalid_argument(format!("webhook URL is invalid: {e}")))?;

        let message_types: Vec<MessageKind> = req.message_types().map(MessageKind::from).collect();
        let now = Utc::now();
        let webhook = Webhook {
            webhook_id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            organization_id: req.organization_id,
            url: req.url,
            topic_patterns: req.topic_patterns,
            device_ids: req.device_ids,
            message_types,
            headers: req.headers,
            secret: (!req.secret.is_empty()).then_some(req.secret),
            enabled: true,
            created_at: now,
            updated_at: now,
            success_count: 0,
            failure_count: 0,
        };

        self.webhooks.register(webhook.clone());
        log::info!(
            "Registered webhook {} for user {} -> {}",
            webhook.webhook_id,
            webhook.user_id,
            webhook.url
        );
        self.audit(&req.user_id, "register_webhook", &[("webhook_id", &webhook.webhook_id)]);

        Ok(pb::WebhookResponse {
            webhook: Some(webhook_to_proto(&webhook)),
        })
    }

    pub(super) fn handle_unregister_webhook(
        &self,
        req: pb::UnregisterWebhookRequest,
    ) -> Result<pb::UnregisterWebhookResponse, Status> {
        authorize(&req.user_id)?;

        self.registry
            .remove_webhook(&req.user_id, &req.webhook_id)
            .map_err(|e| match e {
                RegistryError::NotFound => Status::not_found("webhook not found"),
                RegistryError::Forbidden => {
                    Status::permission_denied("webhook belongs to another user")
                }
            })?;
        log::info!("Unregistered webhook {}", req.webhook_id);
        self.audit(&req.user_id, "unregister_webhook", &[("webhook_id", &req.webhook_id)]);

        Ok(pb::UnregisterWebhookResponse { success: true })
    }

    pub(super) fn handle_list_webhooks(
        &self,
        req: pb::ListWebhooksRequest,
    ) -> Result<pb::ListWebhooksResponse, Status> {
        authorize(&req.user_id)?;

        let organization_id = (!req.organization_id.is_empty()).then_some(req.organization_id.as_str());
        let webhooks = self
            .registry
            .list_webhooks(&req.user_id, organization_id, req.include_disabled)
            .iter()
            .map(webhook_to_proto)
            .collect();
        self.audit(&req.user_id, "list_webhooks", &[]);

        Ok(pb::ListWebhooksResponse { webhooks })
    }
}
