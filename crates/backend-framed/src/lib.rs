//! Backend implementation driving a long-lived TLS connection carrying the
//! proprietary length-prefixed wire protocol (spec §4.3).

mod backoff;
mod tls;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use camcore::{Backend, ConnectionState, FrameStore};
use camcore_protocol::config::FramedBackendConfig;
use camcore_protocol::framed::{
    ChannelInfo, Credential, ErrorCode, FramedMessage, FramedMessageCodec, MediaCodec,
    PlaybackEndReason,
};
use camcore_protocol::{BackendError, DeviceState, MediaPacket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use backoff::Backoff;

enum Cmd {
    Connect,
    Close { stop_stream_first: bool, ack: oneshot::Sender<()> },
    UpdateState(DeviceState),
    Talkback(Bytes),
}

/// Backend implementation for the proprietary framed protocol. Owns a
/// background task driving one TLS connection at a time; `connect`/`close`/
/// `update`/`send_talkback` are thin message sends into that task.
pub struct FramedBackend {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status: Arc<AtomicU8>,
    talk_active: Arc<AtomicBool>,
}

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

/// Consecutive decode errors tolerated before reconnecting (spec §7: drop
/// the current message; if it recurs, reconnect).
const PROTOCOL_ERROR_STRIKE_LIMIT: u32 = 2;

impl FramedBackend {
    pub fn spawn(store: FrameStore, config: FramedBackendConfig) -> Self {
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
            tls_config: tls::build_client_config().ok(),
        };
        tokio::spawn(driver.run());
        Self { cmd_tx, status, talk_active }
    }
}

#[async_trait]
impl Backend for FramedBackend {
    async fn connect(&self) -> Result<(), BackendError> {
        let _ = self.cmd_tx.send(Cmd::Connect);
        Ok(())
    }

    async fn close(&self, stop_stream_first: bool) {
        let (ack, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { stop_stream_first, ack }).is_ok() {
            let _ = rx.await;
        }
    }

    async fn update(&self, state: DeviceState) {
        let _ = self.cmd_tx.send(Cmd::UpdateState(state));
    }

    async fn send_talkback(&self, bytes: Bytes) -> Result<(), BackendError> {
        if !self.talk_active.load(Ordering::SeqCst) {
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
    config: FramedBackendConfig,
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    status: Arc<AtomicU8>,
    talk_active: Arc<AtomicBool>,
    device: Option<DeviceState>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
}

fn pick_audio_channel(current: Option<(u16, MediaCodec)>, ch: &ChannelInfo) -> Option<(u16, MediaCodec)> {
    // Prefer AAC; accept Opus/Speex only if nothing better has been seen.
    match (current, ch.codec) {
        (Some((_, MediaCodec::Aac)), _) => current,
        (_, MediaCodec::Aac) => Some((ch.channel_id, MediaCodec::Aac)),
        (None, MediaCodec::Opus | MediaCodec::Speex) => Some((ch.channel_id, ch.codec)),
        _ => current,
    }
}

impl Driver {
    async fn run(mut self) {
        let mut backoff = Backoff::new();
        let mut host = String::new();
        let mut wants_open = false;

        loop {
            if !wants_open {
                match self.cmd_rx.recv().await {
                    None => return,
                    Some(Cmd::Connect) => {
                        if let Some(d) = &self.device {
                            host = d.endpoint_host.clone();
                            wants_open = true;
                        }
                    }
                    Some(Cmd::Close { ack, .. }) => {
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
            let Some(tls_config) = self.tls_config.clone() else {
                warn!("framed backend has no usable TLS client config, cannot connect");
                wants_open = false;
                continue;
            };

            self.status.store(STATUS_CONNECTING, Ordering::SeqCst);
            let stream = match tls::connect(tls_config, &host, self.config.port).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, host = %host, "framed backend connect failed");
                    self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                    if !self.wait_for_retry_or_cmd(backoff.next_delay(), &mut wants_open, &mut host).await {
                        return;
                    }
                    continue;
                }
            };

            let mut framed = Framed::new(stream, FramedMessageCodec::default());
            let credential = Credential::for_device(dev.auth_kind, dev.auth_token.as_str());
            if framed.send(FramedMessage::Hello { credential: credential.clone() }).await.is_err() {
                self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);
                if !self.wait_for_retry_or_cmd(backoff.next_delay(), &mut wants_open, &mut host).await {
                    return;
                }
                continue;
            }

            let outcome = self.run_connection(&mut framed, credential).await;

            self.talk_active.store(false, Ordering::SeqCst);
            self.status.store(STATUS_DISCONNECTED, Ordering::SeqCst);

            match outcome {
                ConnectionOutcome::Redirect(new_host) => {
                    info!(new_host = %new_host, "framed backend redirected");
                    host = new_host;
                    backoff.reset();
                }
                ConnectionOutcome::UserClosed | ConnectionOutcome::CallerClosed => {
                    wants_open = false;
                }
                ConnectionOutcome::Reconnect { had_media } => {
                    if had_media {
                        backoff.reset();
                    }
                    if !self.wait_for_retry_or_cmd(backoff.next_delay(), &mut wants_open, &mut host).await {
                        return;
                    }
                }
                ConnectionOutcome::ChannelClosed => return,
            }
        }
    }

    /// Sleep for `delay`, but wake early (and react) if a command arrives.
    /// Returns false if the command channel is gone and the driver should
    /// exit entirely.
    async fn wait_for_retry_or_cmd(
        &mut self,
        delay: Duration,
        wants_open: &mut bool,
        host: &mut String,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            cmd = self.cmd_rx.recv() => {
                match cmd {
                    None => false,
                    Some(Cmd::Close { ack, .. }) => {
                        let _ = ack.send(());
                        *wants_open = false;
                        true
                    }
                    Some(Cmd::UpdateState(s)) => {
                        self.device = Some(s);
                        true
                    }
                    Some(Cmd::Connect) => true,
                    Some(Cmd::Talkback(_)) => true,
                }
            }
        }
    }

    /// Run one connection's Authenticating → Authed → Streaming lifecycle
    /// until the socket closes, a terminal message arrives, or the caller
    /// asks to close (spec §4.3 state table). Generic over the stream type
    /// so tests can drive it over an in-memory duplex instead of real TLS.
    async fn run_connection<S>(
        &mut self,
        framed: &mut Framed<S, FramedMessageCodec>,
        credential: Credential,
    ) -> ConnectionOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut authed = false;
        let mut streaming = false;
        let mut had_media = false;
        let mut queued = vec![FramedMessage::StartPlayback];
        let mut session_id: u64 = 0;
        let mut video_channel: Option<u16> = None;
        let mut audio_channel: Option<(u16, MediaCodec)> = None;
        let mut last_media = Instant::now();
        // Consecutive protocol errors tolerated before reconnecting (spec
        // §7: drop the current message, reconnect only if it recurs).
        let mut protocol_error_strikes: u32 = 0;

        let ping_period = Duration::from_millis(self.config.ping_interval_ms);
        let stall_timeout = Duration::from_millis(self.config.stall_timeout_ms);
        let mut ping_due = Instant::now() + ping_period;

        loop {
            let stall_remaining = if streaming {
                stall_timeout.saturating_sub(last_media.elapsed())
            } else {
                Duration::from_secs(3600)
            };
            let ping_remaining = ping_due.saturating_duration_since(Instant::now());

            tokio::select! {
                msg = framed.next() => {
                    match msg {
                        None => return ConnectionOutcome::Reconnect { had_media },
                        Some(Err(e)) => {
                            protocol_error_strikes += 1;
                            warn!(error = %e, strikes = protocol_error_strikes, "framed protocol error");
                            if protocol_error_strikes >= PROTOCOL_ERROR_STRIKE_LIMIT {
                                return ConnectionOutcome::Reconnect { had_media };
                            }
                        }
                        Some(Ok(inner)) => {
                            protocol_error_strikes = 0;
                            match inner {
                                FramedMessage::Ok => {
                                    if !authed {
                                        authed = true;
                                        self.status.store(STATUS_CONNECTED, Ordering::SeqCst);
                                        for qm in queued.drain(..) {
                                            if framed.send(qm).await.is_err() {
                                                return ConnectionOutcome::Reconnect { had_media };
                                            }
                                        }
                                    }
                                }
                                FramedMessage::Error { code, message } => {
                                    if matches!(code, ErrorCode::Auth) {
                                        debug!("framed backend reauthenticating");
                                        let _ = framed
                                            .send(FramedMessage::AuthorizeRequest { credential: credential.clone() })
                                            .await;
                                    } else {
                                        warn!(%message, "framed backend protocol-level error");
                                    }
                                }
                                FramedMessage::PlaybackBegin { session_id: sid, channels } => {
                                    session_id = sid;
                                    for ch in &channels {
                                        match ch.codec {
                                            MediaCodec::H264 => video_channel = Some(ch.channel_id),
                                            _ if ch.codec.is_audio() => {
                                                audio_channel = pick_audio_channel(audio_channel, ch);
                                            }
                                            _ => {}
                                        }
                                    }
                                    streaming = true;
                                    last_media = Instant::now();
                                }
                                FramedMessage::PlaybackPacket(body) | FramedMessage::LongPlaybackPacket(body) => {
                                    last_media = Instant::now();
                                    had_media = true;
                                    if Some(body.channel_id) == video_channel {
                                        self.store.push(MediaPacket::video(body.payload));
                                    } else if audio_channel.map(|(id, _)| id) == Some(body.channel_id) {
                                        self.store.push(MediaPacket::audio(body.payload));
                                    }
                                }
                                FramedMessage::PlaybackEnd { reason } => {
                                    return if matches!(reason, PlaybackEndReason::User) {
                                        ConnectionOutcome::UserClosed
                                    } else {
                                        ConnectionOutcome::Reconnect { had_media }
                                    };
                                }
                                FramedMessage::Redirect { new_host } => {
                                    return ConnectionOutcome::Redirect(new_host);
                                }
                                FramedMessage::TalkbackBegin => {
                                    self.talk_active.store(true, Ordering::SeqCst);
                                }
                                FramedMessage::TalkbackEnd => {
                                    self.talk_active.store(false, Ordering::SeqCst);
                                }
                                _ => {}
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(ping_remaining), if authed => {
                    ping_due = Instant::now() + ping_period;
                    if framed.send(FramedMessage::Ping).await.is_err() {
                        return ConnectionOutcome::Reconnect { had_media };
                    }
                }
                _ = tokio::time::sleep(stall_remaining), if streaming => {
                    warn!("framed backend stall timeout, reconnecting");
                    return ConnectionOutcome::Reconnect { had_media };
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return ConnectionOutcome::ChannelClosed,
                        Some(Cmd::Close { stop_stream_first, ack }) => {
                            if stop_stream_first && streaming {
                                let _ = framed.send(FramedMessage::StopPlayback).await;
                            }
                            let _ = ack.send(());
                            return ConnectionOutcome::CallerClosed;
                        }
                        Some(Cmd::UpdateState(s)) => self.device = Some(s),
                        Some(Cmd::Connect) => {}
                        Some(Cmd::Talkback(bytes)) => {
                            if authed && !bytes.is_empty() {
                                let _ = framed
                                    .send(FramedMessage::AudioPayload {
                                        payload: bytes,
                                        session_id,
                                        codec: MediaCodec::Speex,
                                        sample_rate: 16_000,
                                    })
                                    .await;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcore::FillerFrames;
    use camcore_protocol::framed::{MessageTag, PlaybackPacketBody};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::Mutex as TokioMutex;

    struct CollectingSink {
        collected: Arc<TokioMutex<Vec<Bytes>>>,
    }

    #[async_trait::async_trait]
    impl camcore::MediaSink for CollectingSink {
        async fn write(&self, bytes: Bytes) -> std::io::Result<()> {
            self.collected.lock().await.push(bytes);
            Ok(())
        }
    }

    fn sink() -> (Arc<dyn camcore::MediaSink>, Arc<TokioMutex<Vec<Bytes>>>) {
        let collected = Arc::new(TokioMutex::new(Vec::new()));
        (Arc::new(CollectingSink { collected: collected.clone() }), collected)
    }

    fn test_config(stall_timeout_ms: u64) -> FramedBackendConfig {
        FramedBackendConfig { port: 443, ping_interval_ms: 60_000, stall_timeout_ms }
    }

    /// Build a `Driver` that bypasses TLS entirely, for driving
    /// `run_connection` over an in-memory duplex stream. Returns the `Cmd`
    /// sender too so it isn't dropped: a dropped sender makes the driver's
    /// `cmd_rx.recv()` branch spuriously ready with `None`.
    fn test_driver(store: FrameStore, config: FramedBackendConfig) -> (Driver, mpsc::UnboundedSender<Cmd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            store,
            config,
            cmd_rx: rx,
            status: Arc::new(AtomicU8::new(STATUS_DISCONNECTED)),
            talk_active: Arc::new(AtomicBool::new(false)),
            device: None,
            tls_config: None,
        };
        (driver, tx)
    }

    fn credential() -> Credential {
        Credential::Session("tok".into())
    }

    /// A malformed `Redirect` record: a declared string length of 2
    /// followed by invalid-UTF-8 bytes. Triggers `MessageCodecError::
    /// InvalidUtf8` *after* the framing layer has consumed the record, so
    /// (unlike an unknown-tag error) it doesn't self-repeat on the next
    /// poll of the same stream.
    fn malformed_redirect_record() -> Vec<u8> {
        vec![MessageTag::Redirect as u8, 0, 4, 0, 2, 0xFF, 0xFE]
    }

    #[tokio::test]
    async fn cold_start_sequencing_reaches_streaming() {
        let store = FrameStore::spawn(16, Duration::from_secs(3600), FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() });
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_record("r1", video, audio).await.unwrap();

        let (client, server) = tokio::io::duplex(8192);
        let mut client_framed = Framed::new(client, FramedMessageCodec::default());
        let mut server_framed = Framed::new(server, FramedMessageCodec::default());

        let (mut driver, _tx) = test_driver(store, test_config(8_000));
        let run = tokio::spawn(async move { driver.run_connection(&mut client_framed, credential()).await });

        // `Driver::run` sends Hello before calling `run_connection`; here we
        // call `run_connection` directly and just ack straight to Ok, since
        // authentication itself isn't under test.
        server_framed.send(FramedMessage::Ok).await.unwrap();
        assert_eq!(server_framed.next().await.unwrap().unwrap(), FramedMessage::StartPlayback);

        server_framed
            .send(FramedMessage::PlaybackBegin {
                session_id: 1,
                channels: vec![
                    ChannelInfo { channel_id: 1, codec: MediaCodec::H264 },
                    ChannelInfo { channel_id: 2, codec: MediaCodec::Aac },
                ],
            })
            .await
            .unwrap();
        server_framed
            .send(FramedMessage::PlaybackPacket(PlaybackPacketBody {
                channel_id: 1,
                timestamp_delta: 0,
                payload: Bytes::from_static(&[9, 9, 9]),
            }))
            .await
            .unwrap();
        server_framed.send(FramedMessage::PlaybackEnd { reason: PlaybackEndReason::User }).await.unwrap();

        let outcome = run.await.unwrap();
        assert!(matches!(outcome, ConnectionOutcome::UserClosed));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let got = collected.lock().await;
        assert!(got.iter().any(|b| b.ends_with(&[9, 9, 9])));
    }

    #[tokio::test]
    async fn redirect_message_ends_connection_with_new_host() {
        let store = FrameStore::spawn(16, Duration::from_secs(3600), FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() });
        let (client, server) = tokio::io::duplex(8192);
        let mut client_framed = Framed::new(client, FramedMessageCodec::default());
        let mut server_framed = Framed::new(server, FramedMessageCodec::default());

        let (mut driver, _tx) = test_driver(store, test_config(8_000));
        let run = tokio::spawn(async move { driver.run_connection(&mut client_framed, credential()).await });

        server_framed.send(FramedMessage::Ok).await.unwrap();
        assert_eq!(server_framed.next().await.unwrap().unwrap(), FramedMessage::StartPlayback);
        server_framed.send(FramedMessage::Redirect { new_host: "host2".into() }).await.unwrap();

        let outcome = run.await.unwrap();
        match outcome {
            ConnectionOutcome::Redirect(host) => assert_eq!(host, "host2"),
            _ => panic!("expected Redirect outcome"),
        }
    }

    #[tokio::test]
    async fn stall_timeout_reconnects_without_media() {
        let store = FrameStore::spawn(16, Duration::from_secs(3600), FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() });
        let (client, server) = tokio::io::duplex(8192);
        let mut client_framed = Framed::new(client, FramedMessageCodec::default());
        let mut server_framed = Framed::new(server, FramedMessageCodec::default());

        let (mut driver, _tx) = test_driver(store, test_config(50));
        let run = tokio::spawn(async move { driver.run_connection(&mut client_framed, credential()).await });

        server_framed.send(FramedMessage::Ok).await.unwrap();
        assert_eq!(server_framed.next().await.unwrap().unwrap(), FramedMessage::StartPlayback);
        server_framed
            .send(FramedMessage::PlaybackBegin { session_id: 1, channels: vec![] })
            .await
            .unwrap();

        let outcome = run.await.unwrap();
        match outcome {
            ConnectionOutcome::Reconnect { had_media } => assert!(!had_media),
            _ => panic!("expected Reconnect outcome from stall timeout"),
        }
    }

    #[tokio::test]
    async fn single_protocol_error_does_not_reconnect_but_second_strike_does() {
        let store = FrameStore::spawn(16, Duration::from_secs(3600), FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() });
        let (client, server) = tokio::io::duplex(8192);
        let mut client_framed = Framed::new(client, FramedMessageCodec::default());
        let mut server_framed = Framed::new(server, FramedMessageCodec::default());

        let (mut driver, _tx) = test_driver(store, test_config(8_000));
        let run = tokio::spawn(async move { driver.run_connection(&mut client_framed, credential()).await });

        server_framed.send(FramedMessage::Ok).await.unwrap();
        assert_eq!(server_framed.next().await.unwrap().unwrap(), FramedMessage::StartPlayback);

        server_framed.get_mut().write_all(&malformed_redirect_record()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!run.is_finished(), "a single protocol error should not reconnect");

        server_framed.get_mut().write_all(&malformed_redirect_record()).await.unwrap();
        let outcome = run.await.unwrap();
        assert!(matches!(outcome, ConnectionOutcome::Reconnect { .. }));
    }
}

enum ConnectionOutcome {
    /// Remote sent Redirect; reconnect immediately to the new host.
    Redirect(String),
    /// PlaybackEnd(reason=USER) or StopPlayback handshake completed cleanly.
    UserClosed,
    /// `close()` was called by the Session controller.
    CallerClosed,
    /// Socket closed, protocol error, or stall; back off and retry the
    /// same host.
    Reconnect { had_media: bool },
    /// The command channel was dropped; the backend handle itself was
    /// dropped, so the driver should exit.
    ChannelClosed,
}
