use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{FramedMessage, MessageCodecError, MessageTag};

/// One on-wire record: a 1-byte tag followed by either a 2-byte or 4-byte
/// big-endian length (only `LongPlaybackPacket` uses the 4-byte form) and
/// the raw payload (spec §4.3). This is the framing layer; `FramedMessage`
/// owns the payload's internal shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub tag: MessageTag,
    pub payload: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error(transparent)]
    Message(#[from] MessageCodecError),
    #[error("record payload of {0} bytes exceeds the 2-byte length prefix (max 65535)")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `tokio_util::codec::Decoder`/`Encoder` for `RawRecord`, suitable for
/// wrapping a TLS stream in a `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct RawRecordCodec {
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    Header,
    Body {
        tag: MessageTag,
        len: usize,
    },
}

impl Decoder for RawRecordCodec {
    type Item = RawRecord;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawRecord>, FramingError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let tag_byte = src[0];
                    let tag = MessageTag::from_u8(tag_byte)
                        .ok_or(MessageCodecError::UnknownTag(tag_byte))?;
                    let len_width = if tag.uses_long_length() { 4 } else { 2 };
                    if src.len() < 1 + len_width {
                        return Ok(None);
                    }
                    let len = if len_width == 4 {
                        u32::from_be_bytes(src[1..5].try_into().unwrap()) as usize
                    } else {
                        u16::from_be_bytes(src[1..3].try_into().unwrap()) as usize
                    };
                    src.advance(1 + len_width);
                    src.reserve(len);
                    self.state = DecodeState::Body { tag, len };
                }
                DecodeState::Body { tag, len } => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    self.state = DecodeState::Header;
                    return Ok(Some(RawRecord { tag, payload }));
                }
            }
        }
    }
}

impl Encoder<RawRecord> for RawRecordCodec {
    type Error = FramingError;

    fn encode(&mut self, item: RawRecord, dst: &mut BytesMut) -> Result<(), FramingError> {
        let len_width = if item.tag.uses_long_length() { 4 } else { 2 };
        if len_width == 2 && item.payload.len() > u16::MAX as usize {
            return Err(FramingError::PayloadTooLarge(item.payload.len()));
        }
        dst.reserve(1 + len_width + item.payload.len());
        dst.put_u8(item.tag as u8);
        if len_width == 4 {
            dst.put_u32(item.payload.len() as u32);
        } else {
            dst.put_u16(item.payload.len() as u16);
        }
        dst.put_slice(&item.payload);
        Ok(())
    }
}

/// Higher-level codec operating on decoded `FramedMessage`s directly.
#[derive(Debug, Default)]
pub struct FramedMessageCodec {
    inner: RawRecordCodec,
}

impl Decoder for FramedMessageCodec {
    type Item = FramedMessage;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FramedMessage>, FramingError> {
        match self.inner.decode(src)? {
            Some(record) => Ok(Some(FramedMessage::decode(record.tag, &record.payload)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<FramedMessage> for FramedMessageCodec {
    type Error = FramingError;

    fn encode(&mut self, item: FramedMessage, dst: &mut BytesMut) -> Result<(), FramingError> {
        let record = RawRecord { tag: item.tag(), payload: Bytes::from(item.encode_payload()) };
        self.inner.encode(record, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framed::message::{Credential, PlaybackPacketBody};

    #[test]
    fn short_record_roundtrips_through_bytesmut() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::new();
        let record = RawRecord { tag: MessageTag::Ping, payload: Bytes::new() };
        codec.encode(record.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn long_record_uses_four_byte_length() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![7u8; 70_000]);
        let record = RawRecord { tag: MessageTag::LongPlaybackPacket, payload: payload.clone() };
        codec.encode(record, &mut buf).unwrap();
        // tag byte + 4-byte length prefix before the payload
        assert_eq!(&buf[1..5], &(70_000u32).to_be_bytes());
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn decode_returns_none_on_partial_header() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::from(&[MessageTag::Hello as u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_returns_none_on_partial_body() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u8(MessageTag::Ping as u8);
        buf.put_u16(10);
        buf.put_slice(&[1, 2, 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::from(&[255u8, 0, 0][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FramingError::Message(MessageCodecError::UnknownTag(255))));
    }

    #[test]
    fn two_records_back_to_back_decode_in_order() {
        let mut codec = RawRecordCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(RawRecord { tag: MessageTag::Ping, payload: Bytes::new() }, &mut buf)
            .unwrap();
        codec
            .encode(RawRecord { tag: MessageTag::Ok, payload: Bytes::new() }, &mut buf)
            .unwrap();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.tag, MessageTag::Ping);
        assert_eq!(second.tag, MessageTag::Ok);
    }

    #[test]
    fn message_codec_roundtrips_framed_message() {
        let mut codec = FramedMessageCodec::default();
        let mut buf = BytesMut::new();
        let msg = FramedMessage::Hello { credential: Credential::Session("tok".into()) };
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn message_codec_roundtrips_playback_packet() {
        let mut codec = FramedMessageCodec::default();
        let mut buf = BytesMut::new();
        let msg = FramedMessage::PlaybackPacket(PlaybackPacketBody {
            channel_id: 3,
            timestamp_delta: 12,
            payload: Bytes::from_static(&[9, 9, 9]),
        });
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }
}
