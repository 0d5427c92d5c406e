//! Browser native-messaging bridge.

pub mod codec;
pub mod heartbeat;
mod host;
pub mod messages;

pub use codec::{read_frame, write_frame, FrameError, MAX_FRAME_BYTES};
pub use heartbeat::{extension_status, ExtensionStatus};
pub use host::NativeHost;
pub use messages::Envelope;
