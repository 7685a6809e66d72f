//! FrameStore, the Backend contract, and the Session controller: the
//! concurrency-bearing heart of the camera media core.

pub mod backend;
pub mod consumer;
pub mod filler;
pub mod session;
pub mod store;
pub mod trunk;

pub use backend::{Backend, ConnectionState};
pub use consumer::{ConsumerHandle, ConsumerKind, MediaSink, SinkError, TalkbackSource};
pub use filler::FillerFrames;
pub use session::SessionController;
pub use store::FrameStore;
