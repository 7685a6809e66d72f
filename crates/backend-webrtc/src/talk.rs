use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::Error as WebRtcError;

/// Frames caller-supplied talkback chunks as RTP packets on the audio
/// sender's track (spec §4.4 talkback framing). One packet per chunk,
/// marker bit set, timestamp the wall-clock low 32 bits.
pub struct TalkbackSender {
    track: Arc<TrackLocalStaticRTP>,
    ssrc: u32,
    payload_type: u8,
    sequence: AtomicU16,
}

impl TalkbackSender {
    pub fn new(track: Arc<TrackLocalStaticRTP>, ssrc: u32, payload_type: u8) -> Self {
        Self { track, ssrc, payload_type, sequence: AtomicU16::new(0) }
    }

    pub async fn send_chunk(&self, bytes: Bytes) -> Result<(), WebRtcError> {
        let sequence_number = self.sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u32;

        let packet = Packet {
            header: rtp::header::Header {
                version: 2,
                marker: true,
                payload_type: self.payload_type,
                sequence_number,
                timestamp,
                ssrc: self.ssrc,
                ..Default::default()
            },
            payload: bytes,
        };
        self.track.write_rtp(&packet).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_monotonic() {
        let seq = AtomicU16::new(0);
        let a = seq.fetch_add(1, Ordering::Relaxed);
        let b = seq.fetch_add(1, Ordering::Relaxed);
        assert_eq!(b, a + 1);
    }
}
