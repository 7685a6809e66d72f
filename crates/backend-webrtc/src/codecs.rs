use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::Error as WebRtcError;

pub const VIDEO_PAYLOAD_TYPE: u8 = 102;
pub const AUDIO_PAYLOAD_TYPE: u8 = 111;
pub const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=4d0028";

/// Build the webrtc-rs `API` with exactly the two codecs the remote camera
/// negotiates (spec §4.4 step 2). Deliberately does not call
/// `register_default_codecs`: the control service always answers with
/// H.264 main-profile video and Opus audio, so any other codec negotiated
/// would just be dead weight (and for video, incompatible fmtp).
pub fn build_api() -> Result<API, WebRtcError> {
    let mut media_engine = MediaEngine::default();

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90_000,
                channels: 0,
                sdp_fmtp_line: H264_FMTP.to_string(),
                rtcp_feedback: vec![
                    RTCPFeedback { typ: "transport-cc".into(), parameter: "".into() },
                    RTCPFeedback { typ: "nack".into(), parameter: "".into() },
                    RTCPFeedback { typ: "nack".into(), parameter: "pli".into() },
                    RTCPFeedback { typ: "ccm".into(), parameter: "fir".into() },
                    RTCPFeedback { typ: "goog-remb".into(), parameter: "".into() },
                ],
            },
            payload_type: VIDEO_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![
                    RTCPFeedback { typ: "transport-cc".into(), parameter: "".into() },
                    RTCPFeedback { typ: "nack".into(), parameter: "".into() },
                ],
            },
            payload_type: AUDIO_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    Ok(APIBuilder::new().with_media_engine(media_engine).with_interceptor_registry(registry).build())
}
