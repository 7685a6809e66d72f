use anyhow::{Context, Result};
use camcore_protocol::grpc::{
    camera_control_client::CameraControlClient, HomeGraphRequest, JoinStreamCommand,
    JoinStreamRequest, JoinStreamResponse, StartViewingRequest, TalkbackRequest,
};
use tonic::transport::Channel;
use tonic::Request;

/// Thin wrapper over the generated gRPC client: adds the user-agent
/// metadata every request carries and collapses request construction for
/// the four verbs the backend needs (spec §4.4).
#[derive(Clone)]
pub struct ControlClient {
    inner: CameraControlClient<Channel>,
    user_agent: String,
}

impl ControlClient {
    pub async fn connect(endpoint: String, user_agent: String) -> Result<Self> {
        let channel = Channel::from_shared(endpoint)
            .context("invalid control endpoint")?
            .connect()
            .await
            .context("connecting control channel")?;
        Ok(Self { inner: CameraControlClient::new(channel), user_agent })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        if let Ok(value) = self.user_agent.parse() {
            req.metadata_mut().insert("user-agent", value);
        }
        req
    }

    /// Resolve `device_id` against the home graph by scanning every home's
    /// devices for a third-party id match (spec §4.4 ID translation).
    pub async fn resolve_internal_id(&mut self, device_id: &str) -> Result<Option<String>> {
        let resp = self.inner.get_home_graph(self.request(HomeGraphRequest {})).await?.into_inner();
        for home in resp.homes {
            for device in home.devices {
                if device.third_party_ids.iter().any(|id| id == device_id) {
                    return Ok(Some(device.internal_id));
                }
            }
        }
        Ok(None)
    }

    pub async fn start_viewing(&mut self, internal_device_id: &str) -> Result<i32> {
        let resp = self
            .inner
            .start_viewing(self.request(StartViewingRequest {
                internal_device_id: internal_device_id.to_string(),
            }))
            .await?
            .into_inner();
        Ok(resp.status)
    }

    pub async fn offer(
        &mut self,
        internal_device_id: &str,
        offer_sdp: String,
    ) -> Result<JoinStreamResponse> {
        let resp = self
            .inner
            .join_stream(self.request(JoinStreamRequest {
                internal_device_id: internal_device_id.to_string(),
                command: JoinStreamCommand::Offer as i32,
                offer_sdp,
                resolution: "full-high".to_string(),
                stream_context: "default".to_string(),
                stream_id: String::new(),
                reason: String::new(),
            }))
            .await?
            .into_inner();
        Ok(resp)
    }

    pub async fn extend(&mut self, internal_device_id: &str, stream_id: &str) -> Result<JoinStreamResponse> {
        let resp = self
            .inner
            .join_stream(self.request(JoinStreamRequest {
                internal_device_id: internal_device_id.to_string(),
                command: JoinStreamCommand::Extend as i32,
                offer_sdp: String::new(),
                resolution: String::new(),
                stream_context: String::new(),
                stream_id: stream_id.to_string(),
                reason: String::new(),
            }))
            .await?
            .into_inner();
        Ok(resp)
    }

    pub async fn start_talkback(&mut self, internal_device_id: &str, stream_id: &str) -> Result<()> {
        self.inner
            .start_talkback(self.request(TalkbackRequest {
                internal_device_id: internal_device_id.to_string(),
                stream_id: stream_id.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn stop_talkback(&mut self, internal_device_id: &str, stream_id: &str) -> Result<()> {
        self.inner
            .stop_talkback(self.request(TalkbackRequest {
                internal_device_id: internal_device_id.to_string(),
                stream_id: stream_id.to_string(),
            }))
            .await?;
        Ok(())
    }

    pub async fn end(&mut self, internal_device_id: &str, stream_id: &str, reason: &str) -> Result<()> {
        self.inner
            .join_stream(self.request(JoinStreamRequest {
                internal_device_id: internal_device_id.to_string(),
                command: JoinStreamCommand::End as i32,
                offer_sdp: String::new(),
                resolution: String::new(),
                stream_context: String::new(),
                stream_id: stream_id.to_string(),
                reason: reason.to_string(),
            }))
            .await?;
        Ok(())
    }
}
