use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use camcore_protocol::DeviceState;
use tokio::sync::Mutex;
use tracing::warn;

use crate::backend::{Backend, ConnectionState};
use crate::consumer::{ConsumerHandle, MediaSink, TalkbackSource};
use crate::store::FrameStore;

/// Owns exactly one Backend and one FrameStore for a device (spec §4.5)
/// and translates device-state updates and consumer start/stop calls into
/// Backend connect/close calls.
pub struct SessionController {
    device_id: String,
    backend: Arc<dyn Backend>,
    store: FrameStore,
    talkback_silence: Duration,
    last_state: Mutex<Option<DeviceState>>,
}

impl SessionController {
    pub fn new(
        device_id: impl Into<String>,
        backend: Arc<dyn Backend>,
        store: FrameStore,
        talkback_silence: Duration,
    ) -> Self {
        Self { device_id: device_id.into(), backend, store, talkback_silence, last_state: Mutex::new(None) }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// React to a fresh device-state snapshot (spec §4.5). Audio
    /// disallowed closes the backend even though `wants_backend()` alone
    /// would keep it open, since the backend has no way to carry video
    /// without the audio channel it also streams over.
    pub async fn update(&self, state: DeviceState) {
        self.store.set_media_availability(state.media_availability());
        if !state.fully_allowed() {
            self.backend.close(false).await;
        } else if state.wants_backend() {
            if let Err(e) = self.backend.connect().await {
                warn!(device = %self.device_id, error = %e, "backend connect failed");
            }
        }
        self.backend.update(state.clone()).await;
        *self.last_state.lock().await = Some(state);
    }

    async fn ensure_backend_open(&self) {
        if self.backend.connected() == ConnectionState::Disconnected {
            if let Err(e) = self.backend.connect().await {
                warn!(device = %self.device_id, error = %e, "backend connect failed on consumer start");
            }
        }
    }

    pub async fn start_buffer(&self) {
        self.store.attach_buffer().await;
        self.ensure_backend_open().await;
    }

    pub async fn stop_buffer(&self) {
        self.store.detach_buffer().await;
        self.close_if_idle().await;
    }

    /// Start a live consumer (spec §4.6). Returns `anyhow::Result` rather
    /// than bubbling `FrameStoreError` directly: this is an outermost
    /// operation a caller invokes directly, matching the teacher's split
    /// between `thiserror` at the definition site and `anyhow` at the call
    /// boundary.
    pub async fn start_live(
        &self,
        session_id: impl Into<String>,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
        talkback: Option<TalkbackSource>,
    ) -> anyhow::Result<ConsumerHandle> {
        let id = session_id.into();
        let handle = self.store.attach_live(id.clone(), video, audio, talkback).await?;
        self.ensure_backend_open().await;
        if let Some(source) = self.store.talkback_route(&id).await {
            self.spawn_talkback_pump(source);
        }
        Ok(handle)
    }

    /// Start a record consumer (spec §4.6); see `start_live` for the
    /// `anyhow::Result` rationale.
    pub async fn start_record(
        &self,
        session_id: impl Into<String>,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
    ) -> anyhow::Result<ConsumerHandle> {
        let handle = self.store.attach_record(session_id, video, audio).await?;
        self.ensure_backend_open().await;
        Ok(handle)
    }

    pub async fn stop_live(&self, id: impl Into<String>) {
        self.store.detach(id).await;
        self.close_if_idle().await;
    }

    pub async fn stop_record(&self, id: impl Into<String>) {
        self.store.detach(id).await;
        self.close_if_idle().await;
    }

    async fn close_if_idle(&self) {
        if !self.store.has_consumers().await {
            self.backend.close(true).await;
        }
    }

    /// Reads chunks from a live consumer's talkback source and forwards
    /// them to the Backend, inserting a zero-length terminator 500 ms
    /// after the last chunk (spec §4.5, §8 boundary behavior: exactly one
    /// terminator per silence gap).
    fn spawn_talkback_pump(&self, mut source: TalkbackSource) {
        let backend = self.backend.clone();
        let silence = self.talkback_silence;
        tokio::spawn(async move {
            let mut silenced = true;
            loop {
                let next = if silenced {
                    source.recv().await
                } else {
                    match tokio::time::timeout(silence, source.recv()).await {
                        Ok(chunk) => chunk,
                        Err(_elapsed) => {
                            if let Err(e) = backend.send_talkback(Bytes::new()).await {
                                warn!(error = %e, "talkback terminator send failed");
                            }
                            silenced = true;
                            continue;
                        }
                    }
                };
                match next {
                    Some(chunk) => {
                        silenced = false;
                        if let Err(e) = backend.send_talkback(chunk).await {
                            warn!(error = %e, "talkback chunk send failed");
                        }
                    }
                    None => break,
                }
            }
        });
    }
}
