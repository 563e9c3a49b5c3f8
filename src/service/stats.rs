use tonic::Status;

use super::{authorize, device_status_to_proto, BridgeService};
use crate::pb;
use crate::util;

impl BridgeService {
    pub(super) fn handle_get_statistics(
        &self,
        req: pb::GetStatisticsRequest,
    ) -> Result<pb::GetStatisticsResponse, Status> {
        authorize(&req.user_id)?;

        let organization_id = (!req.organization_id.is_empty()).then_some(req.organization_id.as_str());
        let stats = self.registry.statistics(&req.user_id, organization_id);
        self.audit(&req.user_id, "get_statistics", &[]);

        Ok(pb::GetStatisticsResponse {
            total_devices: stats.total_devices,
            online_devices: stats.online_devices,
            devices_by_type: stats.devices_by_type,
            total_topics: stats.total_topics,
            active_sessions: stats.active_sessions,
        })
    }

    pub(super) fn handle_get_device_metrics(
        &self,
        req: pb::GetDeviceMetricsRequest,
    ) -> Result<pb::GetDeviceMetricsResponse, Status> {
        authorize(&req.user_id)?;

        let device = self
            .registry
            .device(&req.user_id, &req.device_id)
            .ok_or_else(|| Status::not_found("device not found"))?;
        self.audit(&req.user_id, "get_device_metrics", &[("device_id", &req.device_id)]);

        Ok(pb::GetDeviceMetricsResponse {
            device_id: device.device_id,
            status: device_status_to_proto(device.status) as i32,
            messages_sent: device.messages_sent,
            messages_received: device.messages_received,
            last_seen_ms: util::to_unix_ms(device.last_seen),
            subscribed_topics: device.subscribed_topics,
        })
    }

    // Health is deliberately unauthenticated; probes carry no principal.
    pub(super) fn handle_health_check(
        &self,
        _req: pb::HealthCheckRequest,
    ) -> Result<pb::HealthCheckResponse, Status> {
        let healthy = self.broker.is_connected();
        Ok(pb::HealthCheckResponse {
            healthy,
            status: if healthy {
                "connected to MQTT broker".to_owned()
            } else {
                "MQTT broker unreachable".to_owned()
            },
        })
    }
}
