use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use camcore_protocol::{FrameStoreError, MediaAvailability, MediaPacket, PacketKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::consumer::{ConsumerHandle, ConsumerKind, MediaSink, SinkError, TalkbackSource};
use crate::filler::FillerFrames;
use crate::trunk::Trunk;

/// The driver's tick period. Not a timer in the protocol sense — just how
/// often we re-evaluate consumer queues and the synthetic-fill clock.
const DRIVER_TICK: Duration = Duration::from_millis(5);

struct ConsumerEntry {
    kind: ConsumerKind,
    queue: VecDeque<MediaPacket>,
    video: Arc<dyn MediaSink>,
    audio: Arc<dyn MediaSink>,
    errors: mpsc::UnboundedSender<SinkError>,
}

enum Command {
    Push(MediaPacket),
    AttachBuffer,
    DetachBuffer,
    AttachLive {
        id: String,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
        talkback: Option<TalkbackSource>,
        reply: oneshot::Sender<Result<ConsumerHandle, FrameStoreError>>,
    },
    AttachRecord {
        id: String,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
        reply: oneshot::Sender<Result<ConsumerHandle, FrameStoreError>>,
    },
    Detach {
        id: String,
        reply: oneshot::Sender<()>,
    },
    HasConsumers(oneshot::Sender<bool>),
    TalkbackRoute {
        id: String,
        reply: oneshot::Sender<Option<TalkbackSource>>,
    },
}

struct Inner {
    trunk: Trunk,
    buffer_attached: bool,
    consumers: HashMap<String, ConsumerEntry>,
    talkback_sources: HashMap<String, TalkbackSource>,
    filler: FillerFrames,
    synthetic_interval: Duration,
    last_synthetic_push: Instant,
}

impl Inner {
    fn has_consumers(&self) -> bool {
        self.buffer_attached || !self.consumers.is_empty()
    }

    /// Step 1 of the driver tick (spec §4.1): push filler when media is not
    /// allowed, gated on the configured interval. Offline and
    /// streaming-disallowed push distinct filler videos (spec §4.1 step 1).
    fn maybe_inject_synthetic(&mut self, availability: MediaAvailability) {
        let video = match availability {
            MediaAvailability::Allowed => return,
            MediaAvailability::Offline => self.filler.offline_video.clone(),
            MediaAvailability::StreamingDisallowed => self.filler.off_video.clone(),
        };
        if self.last_synthetic_push.elapsed() < self.synthetic_interval {
            return;
        }
        self.last_synthetic_push = Instant::now();
        self.push_packet(MediaPacket::synthetic_video(video));
        self.push_packet(MediaPacket::synthetic_audio(FillerFrames::audio_silence()));
    }

    /// Append to the trunk and to every live/record consumer's pending
    /// queue (spec §4.1 `push`).
    fn push_packet(&mut self, packet: MediaPacket) {
        self.trunk.push(packet.clone());
        for entry in self.consumers.values_mut() {
            entry.queue.push_back(packet.clone());
        }
    }

    fn attach_live_or_record(
        &mut self,
        id: String,
        kind: ConsumerKind,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
    ) -> Result<ConsumerHandle, FrameStoreError> {
        if self.consumers.contains_key(&id) {
            return Err(FrameStoreError::DuplicateId);
        }
        let queue = if kind == ConsumerKind::Record {
            self.trunk.snapshot()
        } else {
            VecDeque::new()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.consumers.insert(id.clone(), ConsumerEntry { kind, queue, video, audio, errors: tx });
        Ok(ConsumerHandle { id, errors: rx })
    }

    /// Step 3 of the driver tick: drain one pending packet per consumer and
    /// write it to the matching sink.
    async fn drain_one_round(&mut self) {
        for (id, entry) in self.consumers.iter_mut() {
            let Some(packet) = entry.queue.pop_front() else { continue };
            let bytes = packet.deliverable_bytes();
            let (sink, is_video) = match packet.kind {
                PacketKind::Video => (&entry.video, true),
                PacketKind::Audio => (&entry.audio, false),
            };
            if let Err(e) = sink.write(bytes).await {
                trace!(consumer = %id, video = is_video, error = %e, "sink write failed");
                let _ = entry.errors.send(SinkError {
                    consumer_id: id.clone(),
                    video: is_video,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Per-device rolling buffer and fan-out engine (spec §4.1). Cheap to
/// clone; clones share the same background driver and state.
#[derive(Clone)]
pub struct FrameStore {
    tx: mpsc::UnboundedSender<Command>,
    media_availability: Arc<AtomicU8>,
}

const AVAILABILITY_ALLOWED: u8 = 0;
const AVAILABILITY_OFFLINE: u8 = 1;
const AVAILABILITY_STREAMING_DISALLOWED: u8 = 2;

fn availability_to_u8(availability: MediaAvailability) -> u8 {
    match availability {
        MediaAvailability::Allowed => AVAILABILITY_ALLOWED,
        MediaAvailability::Offline => AVAILABILITY_OFFLINE,
        MediaAvailability::StreamingDisallowed => AVAILABILITY_STREAMING_DISALLOWED,
    }
}

fn availability_from_u8(value: u8) -> MediaAvailability {
    match value {
        AVAILABILITY_OFFLINE => MediaAvailability::Offline,
        AVAILABILITY_STREAMING_DISALLOWED => MediaAvailability::StreamingDisallowed,
        _ => MediaAvailability::Allowed,
    }
}

impl FrameStore {
    pub fn spawn(max_packets: usize, synthetic_interval: Duration, filler: FillerFrames) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let media_availability = Arc::new(AtomicU8::new(AVAILABILITY_ALLOWED));
        let media_availability_driver = media_availability.clone();

        tokio::spawn(async move {
            let mut inner = Inner {
                trunk: Trunk::new(max_packets),
                buffer_attached: false,
                consumers: HashMap::new(),
                talkback_sources: HashMap::new(),
                filler,
                synthetic_interval,
                last_synthetic_push: Instant::now() - synthetic_interval,
            };
            let mut ticker = tokio::time::interval(DRIVER_TICK);
            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        match cmd {
                            Some(cmd) => handle_command(&mut inner, cmd),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let availability = availability_from_u8(media_availability_driver.load(Ordering::Relaxed));
                        inner.maybe_inject_synthetic(availability);
                        inner.trunk.trim();
                        inner.drain_one_round().await;
                    }
                }
            }
            debug!("FrameStore driver exiting");
        });

        Self { tx, media_availability }
    }

    /// Called by the Session controller on every `update(deviceState)` to
    /// tell the driver whether real media is expected, and which filler to
    /// fall back to if not (spec §3/§4.1: offline and streaming-disallowed
    /// push distinct synthetic videos).
    pub fn set_media_availability(&self, availability: MediaAvailability) {
        self.media_availability.store(availability_to_u8(availability), Ordering::Relaxed);
    }

    /// Append one real packet. Fire-and-forget: there is no backpressure
    /// from FrameStore to the Backend (spec §4.1 failure semantics).
    pub fn push(&self, packet: MediaPacket) {
        let _ = self.tx.send(Command::Push(packet));
    }

    pub async fn attach_buffer(&self) {
        let _ = self.tx.send(Command::AttachBuffer);
    }

    pub async fn detach_buffer(&self) {
        let _ = self.tx.send(Command::DetachBuffer);
    }

    pub async fn attach_live(
        &self,
        id: impl Into<String>,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
        talkback: Option<TalkbackSource>,
    ) -> Result<ConsumerHandle, FrameStoreError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::AttachLive { id: id.into(), video, audio, talkback, reply });
        rx.await.unwrap_or(Err(FrameStoreError::NotFound))
    }

    pub async fn attach_record(
        &self,
        id: impl Into<String>,
        video: Arc<dyn MediaSink>,
        audio: Arc<dyn MediaSink>,
    ) -> Result<ConsumerHandle, FrameStoreError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::AttachRecord { id: id.into(), video, audio, reply });
        rx.await.unwrap_or(Err(FrameStoreError::NotFound))
    }

    pub async fn detach(&self, id: impl Into<String>) {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::Detach { id: id.into(), reply });
        let _ = rx.await;
    }

    pub async fn has_consumers(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::HasConsumers(reply));
        rx.await.unwrap_or(false)
    }

    /// Returns (and removes from FrameStore's bookkeeping) the talkback
    /// source registered for a live consumer, if one was supplied at
    /// attach time (spec §4.1 `talkbackRoute`).
    pub async fn talkback_route(&self, id: impl Into<String>) -> Option<TalkbackSource> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Command::TalkbackRoute { id: id.into(), reply });
        rx.await.ok().flatten()
    }
}

fn handle_command(inner: &mut Inner, cmd: Command) {
    match cmd {
        Command::Push(packet) => inner.push_packet(packet),
        Command::AttachBuffer => inner.buffer_attached = true,
        Command::DetachBuffer => inner.buffer_attached = false,
        Command::AttachLive { id, video, audio, talkback, reply } => {
            let result = inner.attach_live_or_record(id.clone(), ConsumerKind::Live, video, audio);
            if result.is_ok() {
                if let Some(source) = talkback {
                    inner.talkback_sources.insert(id, source);
                }
            }
            let _ = reply.send(result);
        }
        Command::AttachRecord { id, video, audio, reply } => {
            let result = inner.attach_live_or_record(id, ConsumerKind::Record, video, audio);
            let _ = reply.send(result);
        }
        Command::Detach { id, reply } => {
            inner.consumers.remove(&id);
            inner.talkback_sources.remove(&id);
            let _ = reply.send(());
        }
        Command::HasConsumers(reply) => {
            let _ = reply.send(inner.has_consumers());
        }
        Command::TalkbackRoute { id, reply } => {
            let _ = reply.send(inner.talkback_sources.remove(&id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::Mutex as TokioMutex;

    struct CollectingSink {
        collected: Arc<TokioMutex<Vec<Bytes>>>,
    }

    #[async_trait::async_trait]
    impl MediaSink for CollectingSink {
        async fn write(&self, bytes: Bytes) -> std::io::Result<()> {
            self.collected.lock().await.push(bytes);
            Ok(())
        }
    }

    fn sink() -> (Arc<dyn MediaSink>, Arc<TokioMutex<Vec<Bytes>>>) {
        let collected = Arc::new(TokioMutex::new(Vec::new()));
        (Arc::new(CollectingSink { collected: collected.clone() }), collected)
    }

    fn store() -> FrameStore {
        FrameStore::spawn(
            10,
            Duration::from_secs(3600),
            FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() },
        )
    }

    fn distinct_filler() -> FillerFrames {
        FillerFrames {
            offline_video: Bytes::from_static(b"offline"),
            off_video: Bytes::from_static(b"off"),
        }
    }

    #[tokio::test]
    async fn live_consumer_sees_only_packets_pushed_after_attach() {
        let store = store();
        store.push(MediaPacket::video(Bytes::from_static(&[1])));
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_live("l1", video, audio, None).await.unwrap();
        store.push(MediaPacket::video(Bytes::from_static(&[2])));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = collected.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(&got[0][..], &[0, 0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn record_consumer_sees_snapshot_then_subsequent_pushes() {
        let store = store();
        store.push(MediaPacket::video(Bytes::from_static(&[1])));
        store.push(MediaPacket::video(Bytes::from_static(&[2])));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_record("r1", video, audio).await.unwrap();
        store.push(MediaPacket::video(Bytes::from_static(&[3])));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = collected.lock().await;
        assert_eq!(got.len(), 3);
        assert_eq!(got[2][4], 3);
    }

    #[tokio::test]
    async fn duplicate_live_id_is_rejected() {
        let store = store();
        let (video, _) = sink();
        let (audio, _) = sink();
        store.attach_live("dup", video.clone(), audio.clone(), None).await.unwrap();
        let err = store.attach_live("dup", video, audio, None).await.unwrap_err();
        assert_eq!(err, FrameStoreError::DuplicateId);
    }

    #[tokio::test]
    async fn has_consumers_reflects_buffer_and_live() {
        let store = store();
        assert!(!store.has_consumers().await);
        store.attach_buffer().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.has_consumers().await);
        store.detach_buffer().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!store.has_consumers().await);
    }

    #[tokio::test]
    async fn trunk_is_bounded_at_max_packets() {
        let store = FrameStore::spawn(
            3,
            Duration::from_secs(3600),
            FillerFrames { offline_video: Bytes::new(), off_video: Bytes::new() },
        );
        for n in 0..10u8 {
            store.push(MediaPacket::video(Bytes::from(vec![n])));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_record("late", video, audio).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = collected.lock().await;
        assert!(got.len() <= 3);
    }

    #[tokio::test]
    async fn offline_availability_injects_offline_video() {
        let store = FrameStore::spawn(10, Duration::from_millis(10), distinct_filler());
        store.set_media_availability(MediaAvailability::Offline);
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_live("l1", video, audio, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let got = collected.lock().await;
        assert!(got.iter().any(|b| b.ends_with(b"offline")));
        assert!(!got.iter().any(|b| b.ends_with(b"off") && !b.ends_with(b"offline")));
    }

    #[tokio::test]
    async fn streaming_disallowed_availability_injects_off_video() {
        let store = FrameStore::spawn(10, Duration::from_millis(10), distinct_filler());
        store.set_media_availability(MediaAvailability::StreamingDisallowed);
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_live("l1", video, audio, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let got = collected.lock().await;
        assert!(got.iter().any(|b| b.ends_with(b"off") && !b.ends_with(b"offline")));
    }

    #[tokio::test]
    async fn allowed_availability_injects_nothing() {
        let store = FrameStore::spawn(10, Duration::from_millis(10), distinct_filler());
        store.set_media_availability(MediaAvailability::Allowed);
        let (video, collected) = sink();
        let (audio, _) = sink();
        store.attach_live("l1", video, audio, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(collected.lock().await.is_empty());
    }
}
