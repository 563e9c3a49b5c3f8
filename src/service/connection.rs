use tonic::Status;

use super::{authorize, BridgeService};
use crate::pb;
use crate::util;

impl BridgeService {
    pub(super) fn handle_connect(&self, req: pb::ConnectRequest) -> Result<pb::ConnectResponse, Status> {
        authorize(&req.user_id)?;

        let session = self.registry.create_session(&req.user_id, &req.client_id);
        log::debug!(
            "Created session {} for user {} (client {:?})",
            session.session_id,
            req.user_id,
            req.client_id
        );
        self.audit(
            &req.user_id,
            "connect",
            &[("session_id", &session.session_id), ("client_id", &req.client_id)],
        );

        Ok(pb::ConnectResponse {
            session_id: session.session_id,
            // Sessions are process-local; there is never broker state to resume.
            session_present: false,
            message: "session created".to_owned(),
        })
    }

    pub(super) fn handle_disconnect(
        &self,
        req: pb::DisconnectRequest,
    ) -> Result<pb::DisconnectResponse, Status> {
        authorize(&req.user_id)?;

        let removed = self.registry.drop_session(&req.user_id, &req.session_id);
        self.audit(&req.user_id, "disconnect", &[("session_id", &req.session_id)]);

        Ok(pb::DisconnectResponse {
            success: removed,
            message: if removed {
                "session closed".to_owned()
            } else {
                "session not found".to_owned()
            },
        })
    }

    pub(super) fn handle_connection_status(
        &self,
        req: pb::ConnectionStatusRequest,
    ) -> Result<pb::ConnectionStatusResponse, Status> {
        authorize(&req.user_id)?;

        let response = match self.registry.session(&req.user_id, &req.session_id) {
            Some(session) => pb::ConnectionStatusResponse {
                connected: true,
                session_id: session.session_id,
                connected_at_ms: util::to_unix_ms(session.connected_at),
                messages_sent: session.messages_sent,
                messages_received: session.messages_received,
                subscribed_topics: session.subscriptions,
            },
            None => pb::ConnectionStatusResponse {
                connected: false,
                session_id: req.session_id.clone(),
                ..Default::default()
            },
        };
        self.audit(&req.user_id, "get_connection_status", &[("session_id", &req.session_id)]);
        Ok(response)
    }
}
