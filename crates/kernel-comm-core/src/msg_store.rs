//! Broadcast + history store of protocol messages.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Message, MessageType};

/// Default history size limit (10 MB).
pub const DEFAULT_HISTORY_BYTES: usize = 10_000 * 1024;

const BROADCAST_CAPACITY: usize = 1024;

struct StoredMsg {
    msg: Message,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Message store with broadcast and history support.
///
/// Late subscribers receive the history first, then live messages.
pub struct MsgStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<Message>,
    history_bytes: usize,
}

impl Default for MsgStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgStore {
    /// Create a store with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_BYTES)
    }

    /// Create a store that keeps at most `history_bytes` of history.
    #[must_use]
    pub fn with_history_limit(history_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_bytes,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: Message) {
        let bytes = msg.approx_bytes();

        // Broadcast and record under one lock; `history_plus_stream` relies on it.
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let _ = self.sender.send(msg.clone()); // live listeners
        while inner.total_bytes.saturating_add(bytes) > self.history_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<Message> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// History entries of one message type.
    #[must_use]
    pub fn history_of(&self, msg_type: MessageType) -> Vec<Message> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .filter(|s| s.msg.msg_type() == msg_type)
            .map(|s| s.msg.clone())
            .collect()
    }

    /// Number of messages currently in history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .len()
    }

    /// Whether the history is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged receivers skip the messages they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Message> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<Message> = inner.history.iter().map(|s| s.msg.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
