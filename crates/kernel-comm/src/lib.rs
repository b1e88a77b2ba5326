//! Client-side comm channels over a kernel session.
//!
//! Provides:
//! - `CommChannel` - Open, send on, and close a comm
//! - `CommHandler` - Receive incoming messages and close notifications

pub mod channel;
pub mod handler;

pub use channel::CommChannel;
pub use handler::{CommHandler, HandlerId};
pub use kernel_comm_core::{JsonObject, KernelConnection, Message, ReplyHandle, Teardown};
