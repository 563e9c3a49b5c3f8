use chrono::Utc;
use tonic::Status;

use super::{authorize, device_status_from_proto, device_to_proto, BridgeService};
use crate::pb;
use crate::registry::{Device, DeviceStatus};

impl BridgeService {
    pub(super) fn handle_register_device(
        &self,
        req: pb::RegisterDeviceRequest,
    ) -> Result<pb::DeviceResponse, Status> {
        authorize(&req.user_id)?;
        if req.device_id.is_empty() {
            return Err(Status::invalid_argument("device id is required"));
        }

        let now = Utc::now();
        let device = Device {
            device_id: req.device_id.clone(),
            name: req.name,
            device_type: req.device_type,
            user_id: req.user_id.clone(),
            organization_id: req.organization_id,
            // Registration says nothing about connectivity.
            status: DeviceStatus::Offline,
            registered_at: now,
            last_seen: now,
            metadata: req.metadata,
            subscribed_topics: Vec::new(),
            messages_sent: 0,
            messages_received: 0,
        };
        self.registry.insert_device(device.clone());
        log::debug!("Registered device {} for user {}", device.device_id, req.user_id);
        self.audit(&req.user_id, "register_device", &[("device_id", &req.device_id)]);

        Ok(pb::DeviceResponse {
            device: Some(device_to_proto(&device)),
        })
    }

    pub(super) fn handle_unregister_device(
        &self,
        req: pb::UnregisterDeviceRequest,
    ) -> Result<pb::UnregisterDeviceResponse, Status> {
        authorize(&req.user_id)?;

        if !self.registry.remove_device(&req.user_id, &req.device_id) {
            return Err(Status::not_found("device not found"));
        }
        self.audit(&req.user_id, "unregister_device", &[("device_id", &req.device_id)]);

        Ok(pb::UnregisterDeviceResponse {
            success: true,
            message: "device removed".to_owned(),
        })
    }

    pub(super) fn handle_list_devices(
        &self,
        req: pb::ListDevicesRequest,
    ) -> Result<pb::ListDevicesResponse, Status> {
        authorize(&req.user_id)?;

        let organization_id = (!req.organization_id.is_empty()).then_some(req.organization_id.as_str());
        let status = req
            .status_filter
            .and_then(|value| pb::DeviceStatus::try_from(value).ok())
            .map(device_status_from_proto);

        let devices = self
            .registry
            .list_devices(&req.user_id, organization_id, status)
            .iter()
            .map(device_to_proto)
            .collect();
        self.audit(&req.user_id, "list_devices", &[]);

        Ok(pb::ListDevicesResponse { devices })
    }

    pub(super) fn handle_get_device_info(
        &self,
        req: pb::GetDeviceInfoRequest,
    ) -> Result<pb::DeviceResponse, Status> {
        authorize(&req.user_id)?;

        // Foreign devices read as absent, not as forbidden.
        let device = self
            .registry
            .device(&req.user_id, &req.device_id)
            .ok_or_else(|| Status::not_found("device not found"))?;
        self.audit(&req.user_id, "get_device_info", &[("device_id", &req.device_id)]);

        Ok(pb::DeviceResponse {
            device: Some(device_to_proto(&device)),
        })
    }

    pub(super) fn handle_update_device_status(
        &self,
        req: pb::UpdateDeviceStatusRequest,
    ) -> Result<pb::DeviceResponse, Status> {
        authorize(&req.user_id)?;

        let status = device_status_from_proto(req.status());
        let device = self
            .registry
            .update_device_status(&req.user_id, &req.device_id, status, &req.metadata)
            .ok_or_else(|| Status::not_found("device not found"))?;
        self.audit(&req.user_id, "update_device_status", &[("device_id", &req.device_id)]);

        Ok(pb::DeviceResponse {
            device: Some(device_to_proto(&device)),
        })
    }
}
