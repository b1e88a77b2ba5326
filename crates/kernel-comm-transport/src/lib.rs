//! Transport pieces for kernel comms.
//!
//! Provides:
//! - Wire envelope (JSON + base64 buffers)
//! - Connection configuration from the environment
//! - `MemoryKernel`, an in-process kernel connection

pub mod config;
pub mod memory;
pub mod protocol;

pub use config::{ConfigError, ConnectionConfig};
pub use memory::MemoryKernel;
pub use protocol::{WireError, WireMessage};
