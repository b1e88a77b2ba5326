//! Core abstractions for kernel comms.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` - Kernel protocol messages and comm content types
//! - `KernelConnection` - The connection a comm transmits through
//! - `ReplyHandle` - Handle for an in-flight request/reply cycle
//! - `Teardown` - One-shot disposal callback
//! - `MsgStore` - Broadcast + history of transmitted messages

pub mod dispose;
pub mod message;
pub mod msg_store;
pub mod reply;
pub mod traits;

pub use dispose::Teardown;
pub use message::{
    Channel, CommCloseContent, CommMsgContent, CommOpenContent, Header, JsonObject, Message,
    MessageError, MessageOptions, MessageType,
};
pub use msg_store::MsgStore;
pub use reply::{ReplyError, ReplyHandle, ReplySender};
pub use traits::KernelConnection;
