use bytes::Bytes;
use camcore_protocol::NAL_START_CODE;

/// A short run of AAC silence, substituted whenever real audio is
/// unavailable (offline/off filler, and the WebRTC Opus→silence path).
/// Not a full AAC frame encoder — a single pre-baked silent AAC-LC frame
/// is sufficient since downstream only needs the stream to keep moving.
const AAC_SILENCE_FRAME: &[u8] = &[0xFF, 0xF1, 0x4C, 0x80, 0x02, 0x1F, 0xFC];

/// The two single-frame H.264 payloads used as video filler (spec §6).
/// Loaded once at startup; NAL start codes are stripped on load so the
/// single prepend-at-delivery code path in `MediaPacket::deliverable_bytes`
/// stays the only place that inserts one.
#[derive(Debug, Clone)]
pub struct FillerFrames {
    pub offline_video: Bytes,
    pub off_video: Bytes,
}

impl FillerFrames {
    pub fn load(resource_path: &str) -> std::io::Result<Self> {
        let offline_video = strip_start_code(std::fs::read(format!("{resource_path}/offline.h264"))?);
        let off_video = strip_start_code(std::fs::read(format!("{resource_path}/off.h264"))?);
        Ok(Self { offline_video, off_video })
    }

    pub fn audio_silence() -> Bytes {
        Bytes::from_static(AAC_SILENCE_FRAME)
    }
}

fn strip_start_code(mut bytes: Vec<u8>) -> Bytes {
    if bytes.starts_with(&NAL_START_CODE) {
        bytes.drain(..NAL_START_CODE.len());
    }
    Bytes::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_start_code_removes_prefix_if_present() {
        let raw = vec![0, 0, 0, 1, 9, 9];
        assert_eq!(&strip_start_code(raw)[..], &[9, 9]);
    }

    #[test]
    fn strip_start_code_is_noop_without_prefix() {
        let raw = vec![9, 9];
        assert_eq!(&strip_start_code(raw)[..], &[9, 9]);
    }

    #[test]
    fn audio_silence_is_non_empty() {
        assert!(!FillerFrames::audio_silence().is_empty());
    }
}
