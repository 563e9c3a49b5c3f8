//! The tonic service trait, delegating each RPC to its handler.

use tonic::{Request, Response, Status};

use super::{BridgeService, DeviceMessageStream, MessageStream};
use crate::pb;
use crate::pb::mqtt_bridge_server::MqttBridge;

#[tonic::async_trait]
impl MqttBridge for BridgeService {
    type SubscribeStream = MessageStream;
    type SubscribeMultipleStream = MessageStream;
    type SubscribeDeviceMessagesStream = DeviceMessageStream;

    async fn connect(
        &self,
        request: Request<pb::ConnectRequest>,
    ) -> Result<Response<pb::ConnectResponse>, Status> {
        self.handle_connect(request.into_inner()).map(Response::new)
    }

    async fn disconnect(
        &self,
        request: Request<pb::DisconnectRequest>,
    ) -> Result<Response<pb::DisconnectResponse>, Status> {
        self.handle_disconnect(request.into_inner()).map(Response::new)
    }

    async fn get_connection_status(
        &self,
        request: Request<pb::ConnectionStatusRequest>,
    ) -> Result<Response<pb::ConnectionStatusResponse>, Status> {
        self.handle_connection_status(request.into_inner()).map(Response::new)
    }

    async fn publish(
        &self,
        request: Request<pb::PublishRequest>,
    ) -> Result<Response<pb::PublishResponse>, Status> {
        self.handle_publish(request.into_inner()).await.map(Response::new)
    }

    async fn publish_batch(
        &self,
        request: Request<pb::PublishBatchRequest>,
    ) -> Result<Response<pb::PublishBatchResponse>, Status> {
        self.handle_publish_batch(request.into_inner()).await.map(Response::new)
    }

    async fn publish_json(
        &self,
        request: Request<pb::PublishJsonRequest>,
    ) -> Result<Response<pb::PublishResponse>, Status> {
        self.handle_publish_json(request.into_inner()).await.map(Response::new)
    }

    async fn subscribe(
        &self,
        request: Request<pb::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        self.handle_subscribe(request.into_inner()).await.map(Response::new)
    }

    async fn subscribe_multiple(
        &self,
        request: Request<pb::SubscribeMultipleRequest>,
    ) -> Result<Response<Self::SubscribeMultipleStream>, Status> {
        self.handle_subscribe_multiple(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn unsubscribe(
        &self,
        request: Request<pb::UnsubscribeRequest>,
    ) -> Result<Response<pb::UnsubscribeResponse>, Status> {
        self.handle_unsubscribe(request.into_inner()).map(Response::new)
    }

    async fn list_subscriptions(
        &self,
        request: Request<pb::ListSubscriptionsRequest>,
    ) -> Result<Response<pb::ListSubscriptionsResponse>, Status> {
        self.handle_list_subscriptions(request.into_inner()).map(Response::new)
    }

    async fn register_device(
        &self,
        request: Request<pb::RegisterDeviceRequest>,
    ) -> Result<Response<pb::DeviceResponse>, Status> {
        self.handle_register_device(request.into_inner()).map(Response::new)
    }

    async fn unregister_device(
        &self,
        request: Request<pb::UnregisterDeviceRequest>,
    ) -> Result<Response<pb::UnregisterDeviceResponse>, Status> {
        self.handle_unregister_device(request.into_inner()).map(Response::new)
    }

    async fn list_devices(
        &self,
        request: Request<pb::ListDevicesRequest>,
    ) -> Result<Response<pb::ListDevicesResponse>, Status> {
        self.handle_list_devices(request.into_inner()).map(Response::new)
    }

    async fn get_device_info(
        &self,
        request: Request<pb::GetDeviceInfoRequest>,
    ) -> Result<Response<pb::DeviceResponse>, Status> {
        self.handle_get_device_info(request.into_inner()).map(Response::new)
    }

    async fn update_device_status(
        &self,
        request: Request<pb::UpdateDeviceStatusRequest>,
    ) -> Result<Response<pb::DeviceResponse>, Status> {
        self.handle_update_device_status(request.into_inner()).map(Response::new)
    }

    async fn get_topic_info(
        &self,
        request: Request<pb::GetTopicInfoRequest>,
    ) -> Result<Response<pb::TopicInfoResponse>, Status> {
        self.handle_get_topic_info(request.into_inner()).map(Response::new)
    }

    async fn list_topics(
        &self,
        request: Request<pb::ListTopicsRequest>,
    ) -> Result<Response<pb::ListTopicsResponse>, Status> {
        self.handle_list_topics(request.into_inner()).map(Response::new)
    }

    async fn validate_topic(
        &self,
        request: Request<pb::ValidateTopicRequest>,
    ) -> Result<Response<pb::ValidateTopicResponse>, Status> {
        self.handle_validate_topic(request.into_inner()).map(Response::new)
    }

    async fn set_retained_message(
        &self,
        request: Request<pb::SetRetainedMessageRequest>,
    ) -> Result<Response<pb::SetRetainedMessageResponse>, Status> {
        self.handle_set_retained_message(request.into_inner()).map(Response::new)
    }

    async fn get_retained_message(
        &self,
        request: Request<pb::GetRetainedMessageRequest>,
    ) -> Result<Response<pb::GetRetainedMessageResponse>, Status> {
        self.handle_get_retained_message(request.into_inner()).map(Response::new)
    }

    async fn delete_retained_message(
        &self,
        request: Request<pb::DeleteRetainedMessageRequest>,
    ) -> Result<Response<pb::DeleteRetainedMessageResponse>, Status> {
        self.handle_delete_retained_message(request.into_inner()).map(Response::new)
    }

    async fn get_statistics(
        &self,
        request: Request<pb::GetStatisticsRequest>,
    ) -> Result<Response<pb::GetStatisticsResponse>, Status> {
        self.handle_get_statistics(request.into_inner()).map(Response::new)
    }

    async fn get_device_metrics(
        &self,
        request: Request<pb::GetDeviceMetricsRequest>,
    ) -> Result<Response<pb::GetDeviceMetricsResponse>, Status> {
        self.handle_get_device_metrics(request.into_inner()).map(Response::new)
    }

    async fn health_check(
        &self,
        request: Request<pb::HealthCheckRequest>,
    ) -> Result<Response<pb::HealthCheckResponse>, Status> {
        self.handle_health_check(request.into_inner()).map(Response::new)
    }

    async fn subscribe_device_messages(
        &self,
        request: Request<pb::SubscribeDeviceMessagesRequest>,
    ) -> Result<Response<Self::SubscribeDeviceMessagesStream>, Status> {
        self.handle_subscribe_device_messages(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn register_webhook(
        &self,
        request: Request<pb::RegisterWebhookRequest>,
    ) -> Result<Response<pb::WebhookResponse>, Status> {
        self.handle_register_webhook(request.into_inner()).map(Response::new)
    }

    async fn unregister_webhook(
        &self,
        request: Request<pb::UnregisterWebhookRequest>,
    ) -> Result<Response<pb::UnregisterWebhookResponse>, Status> {
        self.handle_unregister_webhook(request.into_inner()).map(Response::new)
    }

    async fn list_webhooks(
        &self,
        request: Request<pb::ListWebhooksRequest>,
    ) -> Result<Response<pb::ListWebhooksResponse>, Status> {
        self.handle_list_webhooks(request.into_inner()).map(Response::new)
    }
}
