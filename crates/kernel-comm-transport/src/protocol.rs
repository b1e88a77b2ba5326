//! JSON wire envelope for kernel messages.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use kernel_comm_core::{Channel, Header, JsonObject, Message};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Wire error.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base64 in buffer {index}: {source}")]
    Buffer {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },
}

/// A message as it travels over a JSON transport.
///
/// Binary buffers are base64 encoded. An absent parent header is written
/// as `{}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub channel: Channel,
    pub header: Header,
    #[serde(
        default,
        serialize_with = "serialize_parent",
        deserialize_with = "deserialize_parent"
    )]
    pub parent_header: Option<Header>,
    #[serde(default)]
    pub metadata: JsonObject,
    pub content: Value,
    #[serde(default)]
    pub buffers: Vec<String>,
}

impl WireMessage {
    /// Convert a message into its wire form.
    #[must_use]
    pub fn from_message(msg: &Message) -> Self {
        Self {
            channel: msg.channel,
            header: msg.header.clone(),
            parent_header: msg.parent_header.clone(),
            metadata: msg.metadata.clone(),
            content: msg.content.clone(),
            buffers: msg.buffers.iter().map(|b| BASE64.encode(b)).collect(),
        }
    }

    /// Convert back into a message, decoding buffers.
    ///
    /// # Errors
    /// Returns error if a buffer is not valid base64.
    pub fn into_message(self) -> Result<Message, WireError> {
        let buffers = self
            .buffers
            .iter()
            .enumerate()
            .map(|(index, b)| {
                BASE64
                    .decode(b)
                    .map(Bytes::from)
                    .map_err(|source| WireError::Buffer { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Message {
            channel: self.channel,
            header: self.header,
            parent_header: self.parent_header,
            metadata: self.metadata,
            content: self.content,
            buffers,
        })
    }

    /// Encode a message as a JSON string.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(msg: &Message) -> Result<String, WireError> {
        Ok(serde_json::to_string(&Self::from_message(msg))?)
    }

    /// Decode a message from a JSON string.
    ///
    /// # Errors
    /// Returns error if the JSON or a buffer is malformed.
    pub fn decode(json: &str) -> Result<Message, WireError> {
        serde_json::from_str::<Self>(json)?.into_message()
    }
}

#[allow(clippy::ref_option)]
fn serialize_parent<S: Serializer>(parent: &Option<Header>, s: S) -> Result<S::Ok, S::Error> {
    match parent {
        Some(header) => header.serialize(s),
        None => JsonObject::new().serialize(s),
    }
}

fn deserialize_parent<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Header>, D::Error> {
    let value = Value::deserialize(d)?;
    let empty = value.is_null() || value.as_object().is_some_and(JsonObject::is_empty);
    if empty {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
