//! Connection configuration.

use kernel_comm_core::msg_store::DEFAULT_HISTORY_BYTES;
use uuid::Uuid;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Identity and limits for a kernel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Username stamped on outgoing messages.
    pub username: String,
    /// Session identifier stamped on outgoing messages.
    pub session: String,
    /// History kept of transmitted messages, in bytes.
    pub history_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: "username".into(),
            session: Uuid::new_v4().to_string(),
            history_bytes: DEFAULT_HISTORY_BYTES,
        }
    }
}

impl ConnectionConfig {
    /// Load configuration from the environment.
    ///
    /// Reads `KERNEL_COMM_USERNAME` (falling back to `USER`),
    /// `KERNEL_COMM_SESSION` and `KERNEL_COMM_HISTORY_BYTES`; anything unset
    /// keeps its default.
    ///
    /// # Errors
    /// Returns error if `KERNEL_COMM_HISTORY_BYTES` is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let history_bytes = match lookup("KERNEL_COMM_HISTORY_BYTES") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber {
                    var: "KERNEL_COMM_HISTORY_BYTES",
                    value,
                })?,
            None => defaults.history_bytes,
        };

        Ok(Self {
            username: lookup("KERNEL_COMM_USERNAME")
                .or_else(|| lookup("USER"))
                .unwrap_or(defaults.username),
            session: lookup("KERNEL_COMM_SESSION").unwrap_or(defaults.session),
            history_bytes,
        })
    }
}
