//! Generated client stubs for the WebRTC control channel (spec §4.4), plus
//! a thin wrapper trimming the generated names down to what callers need.

#![allow(clippy::doc_markdown)]

tonic::include_proto!("camcore.control.v1");

pub use camera_control_client::CameraControlClient;

/// Re-exported so `backend-webrtc` doesn't need to depend on `tonic` just
/// to name the transport channel type its client is built over.
pub type GrpcChannel = tonic::transport::Channel;
