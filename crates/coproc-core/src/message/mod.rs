//! Kernel message protocol.
//!
//! - `envelope` -- building, replying to and validating `KernelMessage`s
//! - `bus` -- broadcast bus carrying messages to host-level subscribers

pub mod bus;
pub mod envelope;

pub use bus::MessageBus;
pub use envelope::{
    MessageDraft, MessageError, ReplyDraft, create_message, create_reply, parse_message,
    validate_message,
};
