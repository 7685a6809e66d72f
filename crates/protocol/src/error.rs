/// The error taxonomy from spec §7, shared by both Backend implementations
/// and the Session controller so recovery policy lives in one place.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Socket/HTTP2 I/O failure expected to clear up on reconnect.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Authentication rejected; reauth-only recovery, no teardown.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Unknown tag, length overflow, or undecodable payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Remote asked us to reconnect elsewhere.
    #[error("redirected to {new_host}")]
    Redirect { new_host: String },

    /// The remote peer reset the connection/session out from under us.
    #[error("peer reset: {0}")]
    PeerReset(String),

    /// No media observed within the stall timeout.
    #[error("stream stalled")]
    Stall,

    /// A consumer sink rejected a write.
    #[error("sink failed: {0}")]
    SinkFailed(String),

    /// A caller-supplied argument was invalid; no state change occurred.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation requiring an active talk session was invoked before
    /// one existed.
    #[error("not connected")]
    NotConnected,
}

impl BackendError {
    /// Whether this error kind warrants a bounded reconnect loop (spec §7:
    /// transient-io / stall / peer-reset) as opposed to a local recovery
    /// action or a fail-fast rejection.
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            BackendError::TransientIo(_) | BackendError::Stall | BackendError::PeerReset(_)
        )
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameStoreError {
    #[error("consumer id already in use")]
    DuplicateId,
    #[error("no such consumer")]
    NotFound,
}
