//! Local request/response channel used by the GUI and `procguard ctl`.
//!
//! Frames use the same length-prefixed JSON codec as native messaging.

pub mod client;
pub mod protocol;
pub mod server;
mod service;

pub use client::{ControlClient, ControlError};
pub use protocol::{Request, Response};
pub use server::{handle_connection, serve};
pub use service::ControlService;
