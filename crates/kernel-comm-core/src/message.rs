//! Kernel protocol messages carried by comms.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Protocol version stamped on every header.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Arbitrary JSON object used for `metadata` payloads.
pub type JsonObject = Map<String, Value>;

/// Kernel channel a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Request channel for client-initiated requests.
    Shell,
    /// Broadcast channel the kernel uses to announce state changes.
    #[serde(rename = "iopub")]
    IoPub,
    /// Out-of-band control requests.
    Control,
    /// Input requests from the kernel.
    Stdin,
}

/// Protocol message type, as it appears in `header.msg_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CommOpen,
    CommMsg,
    CommClose,
    CommInfoRequest,
    CommInfoReply,
    /// Kernel execution state broadcast.
    Status,
}

impl MessageType {
    /// Wire name of this message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CommOpen => "comm_open",
            Self::CommMsg => "comm_msg",
            Self::CommClose => "comm_close",
            Self::CommInfoRequest => "comm_info_request",
            Self::CommInfoReply => "comm_info_reply",
            Self::Status => "status",
        }
    }

    /// Channel the kernel publishes this message type on.
    #[must_use]
    pub const fn kernel_channel(self) -> Channel {
        match self {
            Self::CommInfoRequest | Self::CommInfoReply => Channel::Shell,
            Self::CommOpen | Self::CommMsg | Self::CommClose | Self::Status => Channel::IoPub,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Unique message identifier.
    pub msg_id: String,
    /// Message type.
    pub msg_type: MessageType,
    /// User that sent the message.
    pub username: String,
    /// Client session identifier.
    pub session: String,
    /// Creation timestamp.
    pub date: DateTime<Utc>,
    /// Protocol version.
    pub version: String,
}

/// Message error.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid {msg_type} content: {source}")]
    Content {
        msg_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
}

/// Content of a `comm_open` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommOpenContent {
    pub comm_id: String,
    pub target_name: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Content of a `comm_msg` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMsgContent {
    pub comm_id: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Content of a `comm_close` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommCloseContent {
    pub comm_id: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// An empty JSON object, the default `data` payload.
#[must_use]
pub fn empty_object() -> Value {
    Value::Object(JsonObject::new())
}

/// Inputs for building a [`Message`].
#[derive(Debug, Clone)]
pub struct MessageOptions {
    pub channel: Channel,
    pub msg_type: MessageType,
    pub username: String,
    pub session: String,
    pub content: Value,
    pub metadata: JsonObject,
    pub buffers: Vec<Bytes>,
}

impl MessageOptions {
    /// Start options for a message with the given content and no identity.
    #[must_use]
    pub fn new(channel: Channel, msg_type: MessageType, content: Value) -> Self {
        Self {
            channel,
            msg_type,
            username: String::new(),
            session: String::new(),
            content,
            metadata: JsonObject::new(),
            buffers: Vec::new(),
        }
    }

    /// Stamp the sender's username and session.
    #[must_use]
    pub fn identity(mut self, username: impl Into<String>, session: impl Into<String>) -> Self {
        self.username = username.into();
        self.session = session.into();
        self
    }

    /// Attach metadata, if any.
    #[must_use]
    pub fn metadata(mut self, metadata: Option<JsonObject>) -> Self {
        self.metadata = metadata.unwrap_or_default();
        self
    }

    /// Attach raw binary buffers.
    #[must_use]
    pub fn buffers(mut self, buffers: Vec<Bytes>) -> Self {
        self.buffers = buffers;
        self
    }
}

/// A kernel protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Channel the message belongs to.
    pub channel: Channel,
    pub header: Header,
    /// Header of the request this message answers, if any.
    pub parent_header: Option<Header>,
    pub metadata: JsonObject,
    pub content: Value,
    /// Ordered raw binary attachments.
    pub buffers: Vec<Bytes>,
}

impl Message {
    /// Build a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(options: MessageOptions) -> Self {
        Self {
            channel: options.channel,
            header: Header {
                msg_id: Uuid::new_v4().to_string(),
                msg_type: options.msg_type,
                username: options.username,
                session: options.session,
                date: Utc::now(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: None,
            metadata: options.metadata,
            content: options.content,
            buffers: options.buffers,
        }
    }

    /// Message id from the header.
    #[must_use]
    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    /// Message type from the header.
    #[must_use]
    pub const fn msg_type(&self) -> MessageType {
        self.header.msg_type
    }

    /// The `comm_id` field of the content, when present.
    #[must_use]
    pub fn comm_id(&self) -> Option<&str> {
        self.content.get("comm_id").and_then(Value::as_str)
    }

    /// Decode the content into a typed struct.
    ///
    /// # Errors
    /// Returns error if the content does not match `T`.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        serde_json::from_value(self.content.clone()).map_err(|source| MessageError::Content {
            msg_type: self.header.msg_type,
            source,
        })
    }

    /// Approximate size in bytes, used for history accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 256;
        let content = serde_json::to_string(&self.content).map_or(0, |s| s.len());
        let buffers: usize = self.buffers.iter().map(Bytes::len).sum();
        OVERHEAD + content + buffers
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn open_message() -> Message {
        Message::new(
            MessageOptions::new(
                Channel::Shell,
                MessageType::CommOpen,
                json!({ "comm_id": "c1", "target_name": "echo" }),
            )
            .identity("alice", "session-1"),
        )
    }

    #[test]
    fn test_new_stamps_header() {
        let msg = open_message();
        assert_eq!(msg.header.username, "alice");
        assert_eq!(msg.header.session, "session-1");
        assert_eq!(msg.header.version, PROTOCOL_VERSION);
        assert_eq!(msg.msg_type(), MessageType::CommOpen);
        assert!(msg.parent_header.is_none());
        assert!(msg.metadata.is_empty());
        assert!(msg.buffers.is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(open_message().msg_id(), open_message().msg_id());
    }

    #[test]
    fn test_content_data_defaults_to_empty_object() {
        let content: CommOpenContent = open_message().content_as().unwrap();
        assert_eq!(content.comm_id, "c1");
        assert_eq!(content.target_name, "echo");
        assert_eq!(content.data, json!({}));
    }

    #[test]
    fn test_content_mismatch_is_an_error() {
        let msg = Message::new(MessageOptions::new(
            Channel::Shell,
            MessageType::CommMsg,
            json!({ "data": {} }),
        ));
        let err = msg.content_as::<CommMsgContent>().unwrap_err();
        assert!(err.to_string().starts_with("Invalid comm_msg content"));
    }

    #[test]
    fn test_comm_id_lookup() {
        assert_eq!(open_message().comm_id(), Some("c1"));
        let msg = Message::new(MessageOptions::new(
            Channel::Shell,
            MessageType::CommInfoRequest,
            json!({}),
        ));
        assert_eq!(msg.comm_id(), None);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::IoPub).unwrap(), "\"iopub\"");
        assert_eq!(serde_json::to_string(&Channel::Shell).unwrap(), "\"shell\"");
        assert_eq!(
            serde_json::to_string(&MessageType::CommClose).unwrap(),
            "\"comm_close\""
        );
        assert_eq!(MessageType::CommMsg.to_string(), "comm_msg");
        assert_eq!(MessageType::Status.kernel_channel(), Channel::IoPub);
        assert_eq!(MessageType::CommInfoReply.kernel_channel(), Channel::Shell);
    }
}
