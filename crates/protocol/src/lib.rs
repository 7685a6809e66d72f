//! Shared data model, wire codecs, and configuration for the camera media
//! core. Depended on by `camcore` and both Backend implementations so the
//! device model and error taxonomy have exactly one definition.

pub mod config;
pub mod device;
pub mod error;
pub mod framed;
pub mod grpc;
pub mod packet;

pub use config::CameraCoreConfig;
pub use device::{AuthKind, AuthToken, DeviceState, MediaAvailability};
pub use error::{BackendError, FrameStoreError};
pub use packet::{MediaPacket, PacketKind, NAL_START_CODE};
