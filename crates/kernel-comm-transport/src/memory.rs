//! In-process kernel connection.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use kernel_comm_core::{
    Header, KernelConnection, Message, MessageOptions, MessageType, MsgStore,
    ReplyHandle, ReplySender,
};
use serde_json::Value;

use crate::ConnectionConfig;

struct Pending {
    request: Header,
    sender: ReplySender,
}

/// Kernel connection that keeps everything in memory.
///
/// Every accepted shell message is recorded in a [`MsgStore`] and gets a
/// reply handle that stays pending until [`MemoryKernel::reply`] resolves it
/// or the caller drops it. Dropped handles are pruned on the next send.
/// Useful for tests and demos; nothing leaves the process.
pub struct MemoryKernel {
    config: ConnectionConfig,
    store: Arc<MsgStore>,
    pending: Mutex<HashMap<String, Pending>>,
    disposed: AtomicBool,
}

impl MemoryKernel {
    /// Create a new in-memory connection.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        let store = Arc::new(MsgStore::with_history_limit(config.history_bytes));
        Arc::new(Self {
            config,
            store,
            pending: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Store of every transmitted message.
    #[must_use]
    pub fn msg_store(&self) -> Arc<MsgStore> {
        Arc::clone(&self.store)
    }

    /// Snapshot of transmitted messages, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.store.get_history()
    }

    /// Number of requests still waiting for a reply.
    ///
    /// May include handles dropped since the last send.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve the handle of a transmitted request with a kernel reply.
    ///
    /// Returns `false` if no request with that id is pending.
    pub fn reply(&self, msg_id: &str, msg_type: MessageType, content: Value) -> bool {
        let Some(pending) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(msg_id)
        else {
            tracing::warn!("No pending request for reply to {}", msg_id);
            return false;
        };

        let mut reply = Message::new(
            MessageOptions::new(msg_type.kernel_channel(), msg_type, content)
                .identity("kernel", pending.request.session.clone()),
        );
        reply.parent_header = Some(pending.request);

        if pending.sender.send(reply).is_err() {
            tracing::debug!("Reply handle for {} was dropped", msg_id);
        }
        true
    }

    /// Tear the connection down.
    ///
    /// Pending handles resolve with an error and further sends are refused.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let count = pending.len();
            pending.clear();
            count
        };
        tracing::debug!("Memory kernel disposed, dropped {} pending replies", dropped);
    }
}

impl KernelConnection for MemoryKernel {
    fn username(&self) -> String {
        self.config.username.clone()
    }

    fn session(&self) -> String {
        self.config.session.clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn send_shell_message(
        &self,
        msg: Message,
        expect_reply: bool,
        dispose_on_done: bool,
    ) -> Option<ReplyHandle> {
        if self.is_disposed() {
            tracing::trace!("Memory kernel disposed, dropping {}", msg.msg_type());
            return None;
        }

        tracing::trace!(
            "Memory kernel accepted {} {} (expect_reply={})",
            msg.msg_type(),
            msg.msg_id(),
            expect_reply
        );
        let (sender, handle) = ReplyHandle::channel(msg.msg_id(), dispose_on_done);
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            // Handles dropped by their callers can never be resolved.
            pending.retain(|_, p| !p.sender.is_closed());
            pending.insert(
                msg.msg_id().to_string(),
                Pending {
                    request: msg.header.clone(),
                    sender,
                },
            );
        }
        self.store.push(msg);
        Some(handle)
    }
}
