//! Backend implementation driving the gRPC-signaled WebRTC camera
//! protocol (spec §4.4).

mod codecs;
mod control;
mod talk;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use camcore::{Backend, ConnectionState, FrameStore};
use camcore_protocol::config::WebRtcBackendConfig;
use camcore_protocol::grpc::JoinStreamResponse;
use camcore_protocol::{BackendError, DeviceState, MediaPacket};
use rtp::codecs::h264::H264Packet;
use rtp::packetizer::Depacketizer;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use control::ControlClient;
use talk::TalkbackSender;

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

enum Cmd {
    Connect,
    Close { ack: oneshot::Sender<()> },
    UpdateState(DeviceState),
    Talkback(Bytes),
}

/// Backend implementation for the WebRTC-over-gRPC camera protocol. See
/// `FramedBackend` for the same background-driver shape.
pub struct WebRtcBackend {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status: Arc<AtomicU8>,
    talk_active: Arc<AtomicBool>,
}

impl WebRtcBackend {
    pub fn spawn(store: FrameStore, config: WebRtcBackendConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let status = Arc::new(AtomicU8::new(STATUS_DISCONNECTED));
        let talk_active = Arc::new(AtomicBool::new(false));
        let driver = Driver {
            store,
            config,
            cmd_rx,
            status: status.clone(),
            talk_active: talk_active.clone(),
            device: None,
            internal_id: None,
        };
        tokio::spawn(driver.run());
        Self { cmd_tx, status, talk_active }
    }
}

#[async_trait]
impl Backend for WebRtcBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        let _ = self.cmd_tx.send(Cmd::Connect);
        Ok(())
    }

    async fn close(&self, _stop_stream_first: bool) {
        let (ack, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { ack }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn update(&self, state: DeviceState) {
        let _ = self.cmd_tx.send(Cmd::UpdateState(state));
    }

    async fn send_talkback(&self, bytes: Bytes) -> Result<(), BackendError> {
        if !self.talk_active.load(Ordering::SeqCst) && !bytes.is_empty() {
            return Err(BackendError::NotConnected);
        }
        let _ = self.cmd_tx.send(Cmd::Talkback(bytes));
        Ok(())
    }

    fn connected(&self) -> ConnectionState {
        match self.status.load(Ordering::SeqCst) {
            STATUS_CONNECTED => ConnectionState::Connected,
            STATUS_CONNECTING => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

struct Driver {
    store: FrameStore,
    config: WebRtcBackendConfig,
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    status: Arc<AtomicU8>,
    talk_active: Arc<AtomicBool>,
    device: Option<DeviceState>,
    /// Resolved against the home graph on first connect and cached for
    /// the backend's lifetime (spec §4.4 ID translation) since a device's
    /// internal id does not change across reconnects.
    internal_id: Option<String>,
}

struct ActiveSession {
    peer: Arc<RTCPeerConnection>,
    control: ControlClient,
    internal_device_id: String,
    stream_id: String,
    talkback: Option<TalkbackSender>,
}

impl Driver {
    async fn run(mut self) {
        let mut wants_open = false;
        loop {
            if !wants_open {
                match self.cmd_rx.recv().await {
                    None => return,
                    Some(Cmd::Connect) => wants_open = true,
                    Some(Cmd::Close { ack }) => {
                        let _ = ack.send(());
                    }
                    Some(Cmd::UpdateState(s)) => self.device = Some(s),
                    Some(Cmd::Talkback(_)) => {}
                }
                continue;
            }

            let Some(dev) = self.device.clone() else {
                wants_open = false;
                continue;
            };

            self.status.store(STATUS_CONNECTING, Ordering::SeqCst);
            match self.establish(&dev).await {
                Ok(session) => {
                    self.status.store(STATUS_CONNECTED, Ordering::SeqCst);
                    info!(device = %dev.device_id, stream_id = %session.stream_id, "webrtc backend connected");
                    self.run_session(session).await;
                }
                Err(e) => {
                    warn!(device = %dev.device_id, error = %e, "webrtc backend connect failed");
                }
            }

            self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
            self.talk_active.store(false, Ordering::SeqCst);

            if !wants_open {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return,
                        Some(Cmd::Close { ack }) => { let _ = ack.send(()); wants_open = false; }
                        Some(Cmd::UpdateState(s)) => self.device = Some(s),
                        Some(Cmd::Connect) | Some(Cmd::Talkback(_)) => {}
                    }
                }
            }
        }
    }

    async fn establish(&mut self, dev: &DeviceState) -> anyhow::Result<ActiveSession> {
        let endpoint = format!("https://{}", dev.endpoint_host);
        let mut control = ControlClient::connect(endpoint, self.config.user_agent.clone()).await?;

        if self.internal_id.is_none() {
            self.internal_id = control.resolve_internal_id(&dev.device_id).await?;
        }
        let internal_device_id = self
            .internal_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("device {} not found in home graph", dev.device_id))?;

        let status = control.start_viewing(&internal_device_id).await?;
        if status != 0 {
            anyhow::bail!("start_viewing rejected with status {status}");
        }

        let api = codecs::build_api()?;
        let peer = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);

        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "talkback".to_string(),
            "camcore".to_string(),
        ));
        let audio_transceiver = peer
            .add_transceiver_from_track(
                audio_track.clone() as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit { direction: RTCRtpTransceiverDirection::Sendrecv, send_encodings: vec![] }),
            )
            .await?;
        peer.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit { direction: RTCRtpTransceiverDirection::Recvonly, send_encodings: vec![] }),
        )
        .await?;
        let _data_channel = peer.create_data_channel("data", None).await?;

        let store = self.store.clone();
        let pli_interval = Duration::from_millis(self.config.pli_interval_ms);
        let peer_for_track = peer.clone();
        peer.on_track(Box::new(move |track, _receiver, transceiver| {
            let store = store.clone();
            let peer = peer_for_track.clone();
            let kind = transceiver.kind();
            Box::pin(async move {
                handle_remote_track(track, kind, store, peer, pli_interval).await;
            })
        }));

        peer.on_peer_connection_state_change(Box::new(move |state| {
            match state {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    warn!(?state, "webrtc peer connection state degraded");
                }
                _ => info!(?state, "webrtc peer connection state changed"),
            }
            Box::pin(async {})
        }));

        let offer = peer.create_offer(None).await?;
        peer.set_local_description(offer.clone()).await?;

        let response = control.offer(&internal_device_id, offer.sdp).await?;
        if response.status != 0 {
            anyhow::bail!("join_stream offer rejected with status {}", response.status);
        }
        let answer = RTCSessionDescription::answer(response.answer_sdp)?;
        peer.set_remote_description(answer).await?;

        let ssrc = audio_transceiver
            .sender()
            .await
            .get_parameters()
            .await
            .encodings
            .first()
            .map(|e| e.ssrc)
            .unwrap_or_default();
        let talkback = TalkbackSender::new(audio_track, ssrc, codecs::AUDIO_PAYLOAD_TYPE);

        Ok(ActiveSession {
            peer,
            control,
            internal_device_id,
            stream_id: response.stream_id,
            talkback: Some(talkback),
        })
    }

    async fn run_session(&mut self, mut session: ActiveSession) {
        let mut extend_interval = tokio::time::interval(Duration::from_millis(self.config.extend_interval_ms));
        extend_interval.tick().await;

        loop {
            tokio::select! {
                _ = extend_interval.tick() => {
                    match session.control.extend(&session.internal_device_id, &session.stream_id).await {
                        Ok(resp) if extend_was_acknowledged(&resp) => {}
                        Ok(resp) => warn!(status = %resp.extend_status, "webrtc session extend not acknowledged"),
                        Err(e) => warn!(error = %e, "webrtc session extend request failed"),
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => break,
                        Some(Cmd::Close { ack }) => {
                            self.teardown(&mut session).await;
                            let _ = ack.send(());
                            break;
                        }
                        Some(Cmd::UpdateState(s)) => self.device = Some(s),
                        Some(Cmd::Connect) => {}
                        Some(Cmd::Talkback(bytes)) => self.handle_talkback(&mut session, bytes).await,
                    }
                }
            }

            if peer_connection_is_degraded(session.peer.connection_state()) {
                break;
            }
        }
    }

    async fn handle_talkback(&self, session: &mut ActiveSession, bytes: Bytes) {
        let was_active = self.talk_active.load(Ordering::SeqCst);
        if bytes.is_empty() {
            if was_active {
                let _ = session.control.stop_talkback(&session.internal_device_id, &session.stream_id).await;
                self.talk_active.store(false, Ordering::SeqCst);
            }
            return;
        }
        if !was_active {
            if let Err(e) = session.control.start_talkback(&session.internal_device_id, &session.stream_id).await {
                warn!(error = %e, "start_talkback failed");
                return;
            }
            self.talk_active.store(true, Ordering::SeqCst);
        }
        if let Some(sender) = &session.talkback {
            if let Err(e) = sender.send_chunk(bytes).await {
                warn!(error = %e, "talkback RTP send failed");
            }
        }
    }

    async fn teardown(&self, session: &mut ActiveSession) {
        if self.talk_active.load(Ordering::SeqCst) {
            let _ = session.control.stop_talkback(&session.internal_device_id, &session.stream_id).await;
            self.talk_active.store(false, Ordering::SeqCst);
        }
        let _ = session.control.end(&session.internal_device_id, &session.stream_id, "user exited").await;
        let _ = session.peer.close().await;
    }
}

/// Read RTP from one remote track until it ends, pushing reassembled
/// media into the FrameStore (spec §4.4 media plane).
async fn handle_remote_track(
    track: Arc<TrackRemote>,
    kind: RTPCodecType,
    store: FrameStore,
    peer: Arc<RTCPeerConnection>,
    pli_interval: Duration,
) {
    let is_video = kind == RTPCodecType::Video;
    let mut h264 = H264Packet::default();
    let mut nal_buf = BytesMut::new();
    let mut pli_started = false;

    loop {
        let (packet, _attrs) = match track.read_rtp().await {
            Ok(p) => p,
            Err(_) => break,
        };
        if packet.header.padding {
            continue;
        }

        if is_video {
            if !pli_started {
                pli_started = true;
                spawn_pli_loop(peer.clone(), packet.header.ssrc, pli_interval);
            }
            match h264.depacketize(&packet.payload) {
                Ok(fragment) => {
                    nal_buf.extend_from_slice(&fragment);
                    if packet.header.marker {
                        let nal = nal_buf.split().freeze();
                        if !nal.is_empty() {
                            store.push(MediaPacket::video(nal));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "h264 depacketize failed"),
            }
        } else {
            // Opus payload is decoded only to keep the RTP session healthy;
            // downstream expects AAC, so emit silence instead of real
            // audio (spec §4.4, §9 open question).
            store.push(MediaPacket::synthetic_audio(camcore::FillerFrames::audio_silence()));
        }
    }
}

fn spawn_pli_loop(peer: Arc<RTCPeerConnection>, media_ssrc: u32, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let pli = PictureLossIndication { sender_ssrc: 0, media_ssrc };
            if peer.write_rtcp(&[Box::new(pli)]).await.is_err() {
                break;
            }
            if peer.connection_state() == RTCPeerConnectionState::Closed {
                break;
            }
        }
    });
}

/// Whether a peer-connection state means the session should end and, if
/// consumers remain, reconnect (spec §4.4 point 6: any state other than
/// `{connected, connecting}`). `Disconnected` is the common transient
/// ICE-loss case and must trigger this the same as the terminal `Failed`.
fn peer_connection_is_degraded(state: RTCPeerConnectionState) -> bool {
    !matches!(state, RTCPeerConnectionState::Connected | RTCPeerConnectionState::Connecting)
}

/// Whether a `JoinStreamResponse` to an extend request counts as
/// acknowledged (spec §4.4's 120 s extend heartbeat).
fn extend_was_acknowledged(resp: &JoinStreamResponse) -> bool {
    resp.extend_status == "extended"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_and_connecting_are_not_degraded() {
        assert!(!peer_connection_is_degraded(RTCPeerConnectionState::Connected));
        assert!(!peer_connection_is_degraded(RTCPeerConnectionState::Connecting));
    }

    #[test]
    fn failed_and_disconnected_are_degraded() {
        assert!(peer_connection_is_degraded(RTCPeerConnectionState::Failed));
        assert!(peer_connection_is_degraded(RTCPeerConnectionState::Disconnected));
    }

    #[test]
    fn closed_and_unspecified_are_degraded() {
        assert!(peer_connection_is_degraded(RTCPeerConnectionState::Closed));
        assert!(peer_connection_is_degraded(RTCPeerConnectionState::Unspecified));
    }

    fn join_stream_response(extend_status: &str) -> JoinStreamResponse {
        JoinStreamResponse {
            status: 0,
            answer_sdp: String::new(),
            stream_id: "s1".into(),
            extend_status: extend_status.into(),
        }
    }

    #[test]
    fn extend_acknowledged_requires_exact_status_string() {
        assert!(extend_was_acknowledged(&join_stream_response("extended")));
        assert!(!extend_was_acknowledged(&join_stream_response("pending")));
        assert!(!extend_was_acknowledged(&join_stream_response("")));
    }
}
