use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The H.264 Annex B NAL start code every delivered video byte sequence
/// must begin with (spec §3 invariant).
pub const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Video,
    Audio,
}

/// One unit of media flowing from a Backend into a FrameStore. Opaque to
/// the FrameStore: it never inspects `bytes` beyond prepending the NAL
/// start code for video.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub kind: PacketKind,
    pub bytes: Bytes,
    /// True for packets synthesized by the FrameStore driver (offline/off
    /// filler, AAC silence) rather than forwarded from a Backend.
    pub synthetic: bool,
}

impl MediaPacket {
    pub fn video(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Video,
            bytes: bytes.into(),
            synthetic: false,
        }
    }

    pub fn audio(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Audio,
            bytes: bytes.into(),
            synthetic: false,
        }
    }

    pub fn synthetic_video(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Video,
            bytes: bytes.into(),
            synthetic: true,
        }
    }

    pub fn synthetic_audio(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::Audio,
            bytes: bytes.into(),
            synthetic: true,
        }
    }

    /// Returns the bytes to deliver to a sink: video gets the NAL start
    /// code prepended if it isn't already present. Idempotent — a packet
    /// that already starts with the code is returned unchanged (no double
    /// prefix, spec §8 round-trip law).
    pub fn deliverable_bytes(&self) -> Bytes {
        match self.kind {
            PacketKind::Audio => self.bytes.clone(),
            PacketKind::Video => {
                if self.bytes.starts_with(&NAL_START_CODE) {
                    self.bytes.clone()
                } else {
                    let mut buf = Vec::with_capacity(NAL_START_CODE.len() + self.bytes.len());
                    buf.extend_from_slice(&NAL_START_CODE);
                    buf.extend_from_slice(&self.bytes);
                    Bytes::from(buf)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_without_start_code_gets_prefixed() {
        let p = MediaPacket::video(Bytes::from_static(&[0xAA, 0xBB]));
        assert_eq!(&p.deliverable_bytes()[..], &[0, 0, 0, 1, 0xAA, 0xBB]);
    }

    #[test]
    fn video_with_start_code_is_unchanged() {
        let raw: &[u8] = &[0, 0, 0, 1, 0xAA, 0xBB];
        let p = MediaPacket::video(Bytes::copy_from_slice(raw));
        assert_eq!(&p.deliverable_bytes()[..], raw);
    }

    #[test]
    fn audio_is_never_prefixed() {
        let p = MediaPacket::audio(Bytes::from_static(&[0xCC]));
        assert_eq!(&p.deliverable_bytes()[..], &[0xCC]);
    }

    #[test]
    fn synthetic_flag_defaults_false() {
        let p = MediaPacket::audio(Bytes::from_static(&[1]));
        assert!(!p.synthetic);
        let s = MediaPacket::synthetic_audio(Bytes::from_static(&[1]));
        assert!(s.synthetic);
    }
}
