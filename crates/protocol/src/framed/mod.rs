//! Wire types for the proprietary length-prefixed TLS protocol used by
//! `FramedBackend` (spec §4.3).

mod codec;
mod message;

pub use codec::{FramedMessageCodec, FramingError, RawRecord, RawRecordCodec};
pub use message::{
    ChannelInfo, Credential, ErrorCode, FramedMessage, MediaCodec, MessageCodecError, MessageTag,
    PlaybackEndReason, PlaybackPacketBody,
};
