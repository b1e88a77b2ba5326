//! Reply handles for in-flight shell requests.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::Message;

/// Reply error.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("Reply channel dropped for message {0}")]
    Dropped(String),
}

/// Transport side of a reply handle.
#[derive(Debug)]
pub struct ReplySender {
    msg_id: String,
    tx: oneshot::Sender<Message>,
}

impl ReplySender {
    /// Id of the request this sender answers.
    #[must_use]
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    /// Whether the handle has been dropped, so no reply can be delivered.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve the handle. Returns the reply back if the handle was dropped.
    ///
    /// # Errors
    /// Returns the message if the receiving handle no longer exists.
    pub fn send(self, reply: Message) -> Result<(), Message> {
        self.tx.send(reply)
    }
}

/// Handle for a request/reply cycle, resolved by the transport.
///
/// Dropping the handle abandons the reply; it never affects the comm
/// that produced it.
#[derive(Debug)]
pub struct ReplyHandle {
    msg_id: String,
    dispose_on_done: bool,
    rx: oneshot::Receiver<Message>,
}

impl ReplyHandle {
    /// Create a connected sender/handle pair for a request.
    #[must_use]
    pub fn channel(msg_id: impl Into<String>, dispose_on_done: bool) -> (ReplySender, Self) {
        let msg_id = msg_id.into();
        let (tx, rx) = oneshot::channel();
        (
            ReplySender {
                msg_id: msg_id.clone(),
                tx,
            },
            Self {
                msg_id,
                dispose_on_done,
                rx,
            },
        )
    }

    /// Id of the request message.
    #[must_use]
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    /// Whether the transport should tear the handle down once its reply cycle completes.
    #[must_use]
    pub const fn dispose_on_done(&self) -> bool {
        self.dispose_on_done
    }

    /// Wait for the reply.
    ///
    /// # Errors
    /// Returns error if the transport dropped the request without replying.
    pub async fn reply(self) -> Result<Message, ReplyError> {
        let Self { msg_id, rx, .. } = self;
        rx.await.map_err(|_| ReplyError::Dropped(msg_id))
    }
}
