use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// One of the three downstream bindings a FrameStore can fan out to
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerKind {
    /// Keeps the Backend open with no delivery of its own; the trunk
    /// itself is the pre-record buffer.
    Buffer,
    /// Tail-start: sees packets pushed at or after attach time.
    Live,
    /// Head-start: sees a snapshot of the trunk at attach time, then all
    /// subsequent packets.
    Record,
}

/// A writable byte sink with an observable, non-fatal error signal. The
/// FrameStore never reads from a sink, only writes.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn write(&self, bytes: Bytes) -> std::io::Result<()>;
}

/// Error surfaced on a consumer's error channel after a failed sink write.
/// The write itself is swallowed (spec §7 sink-failed policy); this is
/// purely observational, so the controller can decide whether to detach.
#[derive(Debug, Clone)]
pub struct SinkError {
    pub consumer_id: String,
    pub video: bool,
    pub message: String,
}

/// Returned to the caller of `attach_live`/`attach_record`: the channel on
/// which persistent sink failures are reported.
pub struct ConsumerHandle {
    pub id: String,
    pub errors: mpsc::UnboundedReceiver<SinkError>,
}

/// The source of return audio for a live consumer (spec §6: talkback
/// source). The FrameStore just stores it; the Session controller reads
/// from it and drives `Backend::send_talkback`.
pub type TalkbackSource = mpsc::Receiver<Bytes>;
