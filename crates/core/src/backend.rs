use async_trait::async_trait;
use bytes::Bytes;
use camcore_protocol::{BackendError, DeviceState};

/// Tri-state connection status exposed by every Backend (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The capability set every concrete media backend implements (spec §4.2,
/// §9 design note: a capability set rather than an inheritance hierarchy).
/// Implementations push decoded media onto the `FrameStore` handed to them
/// at construction; this trait only covers the control surface.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begin (or resume) connecting. Idempotent from any state other than
    /// already-connecting/connected.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Tear down the connection. Must be safe to call from any state,
    /// including twice in a row (spec §8: `close()` twice ≡ once).
    async fn close(&self, stop_stream_first: bool);

    /// Refresh the read-only device-state snapshot (credentials, online,
    /// streaming/audio allowed, endpoint host).
    async fn update(&self, state: DeviceState);

    /// Forward one talkback chunk. A zero-length chunk is the "end of
    /// utterance" convention (spec §4.3/§4.4). Rejected with
    /// `BackendError::NotConnected` when no talk session is active;
    /// callers are expected to swallow that per spec §7.
    async fn send_talkback(&self, bytes: Bytes) -> Result<(), BackendError>;

    fn connected(&self) -> ConnectionState;
}
