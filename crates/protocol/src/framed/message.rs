use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::device::AuthKind;

/// Wire tag for a framed record (spec §4.3). `LongPlaybackPacket` is the
/// only tag using the 4-byte length variant; see `framed::codec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Ping = 0,
    Hello = 1,
    AuthorizeRequest = 2,
    StartPlayback = 3,
    StopPlayback = 4,
    AudioPayload = 5,
    Ok = 6,
    Error = 7,
    PlaybackBegin = 8,
    PlaybackEnd = 9,
    PlaybackPacket = 10,
    LongPlaybackPacket = 11,
    Redirect = 12,
    TalkbackBegin = 13,
    TalkbackEnd = 14,
}

impl MessageTag {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => Self::Ping,
            1 => Self::Hello,
            2 => Self::AuthorizeRequest,
            3 => Self::StartPlayback,
            4 => Self::StopPlayback,
            5 => Self::AudioPayload,
            6 => Self::Ok,
            7 => Self::Error,
            8 => Self::PlaybackBegin,
            9 => Self::PlaybackEnd,
            10 => Self::PlaybackPacket,
            11 => Self::LongPlaybackPacket,
            12 => Self::Redirect,
            13 => Self::TalkbackBegin,
            14 => Self::TalkbackEnd,
            _ => return None,
        })
    }

    /// Only `LongPlaybackPacket` uses the 4-byte length prefix; every other
    /// type uses the 2-byte one (spec §4.3 wire description).
    pub fn uses_long_length(self) -> bool {
        matches!(self, Self::LongPlaybackPacket)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Session(String),
    OAuth2(String),
}

impl Credential {
    pub fn for_device(kind: AuthKind, token: &str) -> Self {
        match kind {
            AuthKind::Session => Credential::Session(token.to_string()),
            AuthKind::OAuth2 => Credential::OAuth2(token.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCodec {
    H264,
    Aac,
    Opus,
    Speex,
    Unknown(u8),
}

impl MediaCodec {
    fn to_u8(self) -> u8 {
        match self {
            Self::H264 => 1,
            Self::Aac => 2,
            Self::Opus => 3,
            Self::Speex => 4,
            Self::Unknown(b) => b,
        }
    }

    fn from_u8(b: u8) -> Self {
        match b {
            1 => Self::H264,
            2 => Self::Aac,
            3 => Self::Opus,
            4 => Self::Speex,
            other => Self::Unknown(other),
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Self::Aac | Self::Opus | Self::Speex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: u16,
    pub codec: MediaCodec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Auth,
    Other(u8),
}

impl ErrorCode {
    fn to_u8(self) -> u8 {
        match self {
            Self::Auth => 1,
            Self::Other(b) => b,
        }
    }
    fn from_u8(b: u8) -> Self {
        match b {
            1 => Self::Auth,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEndReason {
    User,
    Other(u8),
}

impl PlaybackEndReason {
    fn to_u8(self) -> u8 {
        match self {
            Self::User => 1,
            Self::Other(b) => b,
        }
    }
    fn from_u8(b: u8) -> Self {
        match b {
            1 => Self::User,
            other => Self::Other(other),
        }
    }
}

/// Payload for both `PlaybackPacket` and `LongPlaybackPacket` — the two
/// tags differ only in the length-prefix width, not the payload shape
/// (spec §9 open question: a conforming implementation accepts either
/// interchangeably).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPacketBody {
    pub channel_id: u16,
    pub timestamp_delta: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramedMessage {
    Ping,
    Hello { credential: Credential },
    AuthorizeRequest { credential: Credential },
    StartPlayback,
    StopPlayback,
    AudioPayload { payload: Bytes, session_id: u64, codec: MediaCodec, sample_rate: u32 },
    Ok,
    Error { code: ErrorCode, message: String },
    PlaybackBegin { session_id: u64, channels: Vec<ChannelInfo> },
    PlaybackEnd { reason: PlaybackEndReason },
    PlaybackPacket(PlaybackPacketBody),
    LongPlaybackPacket(PlaybackPacketBody),
    Redirect { new_host: String },
    TalkbackBegin,
    TalkbackEnd,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageCodecError {
    #[error("unknown message tag {0}")]
    UnknownTag(u8),
    #[error("payload too short for {what}: need {need} bytes, have {have}")]
    TooShort { what: &'static str, need: usize, have: usize },
    #[error("payload contains invalid utf-8")]
    InvalidUtf8,
}

fn read_string(buf: &[u8], what: &'static str) -> Result<(String, &[u8]), MessageCodecError> {
    if buf.len() < 2 {
        return Err(MessageCodecError::TooShort { what, need: 2, have: buf.len() });
    }
    let len = BigEndian::read_u16(&buf[0..2]) as usize;
    let rest = &buf[2..];
    if rest.len() < len {
        return Err(MessageCodecError::TooShort { what, need: len, have: rest.len() });
    }
    let s = std::str::from_utf8(&rest[..len])
        .map_err(|_| MessageCodecError::InvalidUtf8)?
        .to_string();
    Ok((s, &rest[len..]))
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_credential(buf: &mut Vec<u8>, credential: &Credential) {
    match credential {
        Credential::Session(token) => {
            buf.push(0);
            write_string(buf, token);
        }
        Credential::OAuth2(token) => {
            buf.push(1);
            write_string(buf, token);
        }
    }
}

fn read_credential(buf: &[u8]) -> Result<(Credential, &[u8]), MessageCodecError> {
    if buf.is_empty() {
        return Err(MessageCodecError::TooShort { what: "credential kind", need: 1, have: 0 });
    }
    let kind = buf[0];
    let (token, rest) = read_string(&buf[1..], "credential token")?;
    let credential = match kind {
        1 => Credential::OAuth2(token),
        _ => Credential::Session(token),
    };
    Ok((credential, rest))
}

impl FramedMessage {
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::Ping => MessageTag::Ping,
            Self::Hello { .. } => MessageTag::Hello,
            Self::AuthorizeRequest { .. } => MessageTag::AuthorizeRequest,
            Self::StartPlayback => MessageTag::StartPlayback,
            Self::StopPlayback => MessageTag::StopPlayback,
            Self::AudioPayload { .. } => MessageTag::AudioPayload,
            Self::Ok => MessageTag::Ok,
            Self::Error { .. } => MessageTag::Error,
            Self::PlaybackBegin { .. } => MessageTag::PlaybackBegin,
            Self::PlaybackEnd { .. } => MessageTag::PlaybackEnd,
            Self::PlaybackPacket(_) => MessageTag::PlaybackPacket,
            Self::LongPlaybackPacket(_) => MessageTag::LongPlaybackPacket,
            Self::Redirect { .. } => MessageTag::Redirect,
            Self::TalkbackBegin => MessageTag::TalkbackBegin,
            Self::TalkbackEnd => MessageTag::TalkbackEnd,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Ping | Self::StartPlayback | Self::StopPlayback | Self::Ok
            | Self::TalkbackBegin | Self::TalkbackEnd => {}
            Self::Hello { credential } | Self::AuthorizeRequest { credential } => {
                write_credential(&mut buf, credential);
            }
            Self::AudioPayload { payload, session_id, codec, sample_rate } => {
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.push(codec.to_u8());
                buf.extend_from_slice(&sample_rate.to_be_bytes());
                buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                buf.extend_from_slice(payload);
            }
            Self::Error { code, message } => {
                buf.push(code.to_u8());
                write_string(&mut buf, message);
            }
            Self::PlaybackBegin { session_id, channels } => {
                buf.extend_from_slice(&session_id.to_be_bytes());
                buf.push(channels.len() as u8);
                for ch in channels {
                    buf.extend_from_slice(&ch.channel_id.to_be_bytes());
                    buf.push(ch.codec.to_u8());
                }
            }
            Self::PlaybackEnd { reason } => {
                buf.push(reason.to_u8());
            }
            Self::PlaybackPacket(body) | Self::LongPlaybackPacket(body) => {
                buf.extend_from_slice(&body.channel_id.to_be_bytes());
                buf.extend_from_slice(&body.timestamp_delta.to_be_bytes());
                buf.extend_from_slice(&body.payload);
            }
            Self::Redirect { new_host } => {
                write_string(&mut buf, new_host);
            }
        }
        buf
    }

    pub fn decode(tag: MessageTag, payload: &[u8]) -> Result<Self, MessageCodecError> {
        Ok(match tag {
            MessageTag::Ping => Self::Ping,
            MessageTag::StartPlayback => Self::StartPlayback,
            MessageTag::StopPlayback => Self::StopPlayback,
            MessageTag::Ok => Self::Ok,
            MessageTag::TalkbackBegin => Self::TalkbackBegin,
            MessageTag::TalkbackEnd => Self::TalkbackEnd,
            MessageTag::Hello => {
                let (credential, _) = read_credential(payload)?;
                Self::Hello { credential }
            }
            MessageTag::AuthorizeRequest => {
                let (credential, _) = read_credential(payload)?;
                Self::AuthorizeRequest { credential }
            }
            MessageTag::AudioPayload => {
                if payload.len() < 17 {
                    return Err(MessageCodecError::TooShort {
                        what: "AudioPayload header",
                        need: 17,
                        have: payload.len(),
                    });
                }
                let session_id = BigEndian::read_u64(&payload[0..8]);
                let codec = MediaCodec::from_u8(payload[8]);
                let sample_rate = BigEndian::read_u32(&payload[9..13]);
                let len = BigEndian::read_u32(&payload[13..17]) as usize;
                let body_start = 17;
                if payload.len() < body_start + len {
                    return Err(MessageCodecError::TooShort {
                        what: "AudioPayload body",
                        need: body_start + len,
                        have: payload.len(),
                    });
                }
                Self::AudioPayload {
                    payload: Bytes::copy_from_slice(&payload[body_start..body_start + len]),
                    session_id,
                    codec,
                    sample_rate,
                }
            }
            MessageTag::Error => {
                if payload.is_empty() {
                    return Err(MessageCodecError::TooShort { what: "Error code", need: 1, have: 0 });
                }
                let code = ErrorCode::from_u8(payload[0]);
                let (message, _) = read_string(&payload[1..], "Error message")?;
                Self::Error { code, message }
            }
            MessageTag::PlaybackBegin => {
                if payload.len() < 9 {
                    return Err(MessageCodecError::TooShort {
                        what: "PlaybackBegin header",
                        need: 9,
                        have: payload.len(),
                    });
                }
                let session_id = BigEndian::read_u64(&payload[0..8]);
                let count = payload[8] as usize;
                let mut channels = Vec::with_capacity(count);
                let mut off = 9;
                for _ in 0..count {
                    if payload.len() < off + 3 {
                        return Err(MessageCodecError::TooShort {
                            what: "PlaybackBegin channel",
                            need: off + 3,
                            have: payload.len(),
                        });
                    }
                    let channel_id = BigEndian::read_u16(&payload[off..off + 2]);
                    let codec = MediaCodec::from_u8(payload[off + 2]);
                    channels.push(ChannelInfo { channel_id, codec });
                    off += 3;
                }
                Self::PlaybackBegin { session_id, channels }
            }
            MessageTag::PlaybackEnd => {
                if payload.is_empty() {
                    return Err(MessageCodecError::TooShort { what: "PlaybackEnd", need: 1, have: 0 });
                }
                Self::PlaybackEnd { reason: PlaybackEndReason::from_u8(payload[0]) }
            }
            MessageTag::PlaybackPacket | MessageTag::LongPlaybackPacket => {
                if payload.len() < 6 {
                    return Err(MessageCodecError::TooShort {
                        what: "PlaybackPacket header",
                        need: 6,
                        have: payload.len(),
                    });
                }
                let channel_id = BigEndian::read_u16(&payload[0..2]);
                let timestamp_delta = BigEndian::read_u32(&payload[2..6]);
                let body = PlaybackPacketBody {
                    channel_id,
                    timestamp_delta,
                    payload: Bytes::copy_from_slice(&payload[6..]),
                };
                if tag == MessageTag::LongPlaybackPacket {
                    Self::LongPlaybackPacket(body)
                } else {
                    Self::PlaybackPacket(body)
                }
            }
            MessageTag::Redirect => {
                let (new_host, _) = read_string(payload, "Redirect host")?;
                Self::Redirect { new_host }
            }
        })
    }
}
