//! Client-side comm channel handle.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use kernel_comm_core::{
    Channel, JsonObject, KernelConnection, Message, MessageOptions, MessageType, ReplyHandle,
    Teardown, message::empty_object,
};
use serde_json::{Value, json};

use crate::handler::{CommHandler, Events, HandlerId, HandlerSet};

enum State {
    /// Kernel reference is non-owning; a dropped kernel is treated like a disposed one.
    Open {
        kernel: Weak<dyn KernelConnection>,
        teardown: Teardown,
    },
    Disposed,
}

/// A bidirectional comm between this client and a kernel.
///
/// The channel starts open and moves to disposed exactly once, through
/// [`CommChannel::close`], [`CommChannel::handle_close`],
/// [`CommChannel::dispose`] or drop. Once disposed, `open`, `send` and
/// `close` return `None` without transmitting anything; the id and target
/// name stay readable.
pub struct CommChannel {
    id: String,
    target_name: String,
    state: State,
    handlers: HandlerSet,
}

impl CommChannel {
    /// Create an open channel.
    ///
    /// `teardown` runs once when the channel is disposed.
    #[must_use]
    pub fn new(
        target_name: impl Into<String>,
        id: impl Into<String>,
        kernel: &Arc<dyn KernelConnection>,
        teardown: Teardown,
    ) -> Self {
        Self {
            id: id.into(),
            target_name: target_name.into(),
            state: State::Open {
                kernel: Arc::downgrade(kernel),
                teardown,
            },
            handlers: HandlerSet::default(),
        }
    }

    /// The comm id, sent as `comm_id` on every message.
    #[must_use]
    pub fn comm_id(&self) -> &str {
        &self.id
    }

    /// The kernel-side target this comm talks to.
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Whether the channel has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self.state, State::Disposed)
    }

    /// Register a handler for both incoming messages and close.
    ///
    /// On a disposed channel the handler is dropped and never called.
    pub fn subscribe(&mut self, handler: Arc<dyn CommHandler>) -> HandlerId {
        let id = self.handlers.next_id();
        if !self.is_disposed() {
            self.handlers.insert(id, handler, Events::All);
        }
        id
    }

    /// Register a callback for incoming `comm_msg` messages.
    pub fn on_msg<F>(&mut self, f: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.handlers.next_id();
        if !self.is_disposed() {
            self.handlers.insert_msg_fn(id, f);
        }
        id
    }

    /// Register a callback for close, local or remote.
    pub fn on_close<F>(&mut self, f: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.handlers.next_id();
        if !self.is_disposed() {
            self.handlers.insert_close_fn(id, f);
        }
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    /// Number of handlers listening for incoming messages.
    #[must_use]
    pub fn msg_handler_count(&self) -> usize {
        self.handlers.msg_count()
    }

    /// Number of handlers listening for close.
    #[must_use]
    pub fn close_handler_count(&self) -> usize {
        self.handlers.close_count()
    }

    fn live_kernel(&self) -> Option<Arc<dyn KernelConnection>> {
        match &self.state {
            State::Open { kernel, .. } => kernel.upgrade().filter(|k| !k.is_disposed()),
            State::Disposed => None,
        }
    }

    fn build(
        kernel: &dyn KernelConnection,
        channel: Channel,
        msg_type: MessageType,
        content: Value,
        metadata: Option<JsonObject>,
        buffers: Vec<Bytes>,
    ) -> Message {
        Message::new(
            MessageOptions::new(channel, msg_type, content)
                .identity(kernel.username(), kernel.session())
                .metadata(metadata)
                .buffers(buffers),
        )
    }

    /// Open the comm on the kernel side.
    ///
    /// Returns `None` if the channel or its kernel is disposed.
    pub fn open(&self, data: Option<Value>, metadata: Option<JsonObject>) -> Option<ReplyHandle> {
        let Some(kernel) = self.live_kernel() else {
            tracing::trace!(
                comm_id = %self.id,
                msg_type = %MessageType::CommOpen,
                "Comm is not live, skipping"
            );
            return None;
        };
        let content = json!({
            "comm_id": self.id,
            "target_name": self.target_name,
            "data": data.unwrap_or_else(empty_object),
        });
        let msg = Self::build(
            kernel.as_ref(),
            Channel::Shell,
            MessageType::CommOpen,
            content,
            metadata,
            Vec::new(),
        );
        tracing::debug!(
            comm_id = %self.id,
            msg_type = %MessageType::CommOpen,
            msg_id = %msg.msg_id(),
            target_name = %self.target_name,
            "Opening comm"
        );
        kernel.send_shell_message(msg, false, true)
    }

    /// Send a `comm_msg` to the kernel.
    ///
    /// `dispose_on_done` is forwarded to the transport and only concerns the
    /// returned handle. Returns `None` if the channel or its kernel is disposed.
    pub fn send(
        &self,
        data: Value,
        metadata: Option<JsonObject>,
        buffers: Vec<Bytes>,
        dispose_on_done: bool,
    ) -> Option<ReplyHandle> {
        let Some(kernel) = self.live_kernel() else {
            tracing::trace!(
                comm_id = %self.id,
                msg_type = %MessageType::CommMsg,
                "Comm is not live, skipping"
            );
            return None;
        };
        let content = json!({ "comm_id": self.id, "data": data });
        let msg = Self::build(
            kernel.as_ref(),
            Channel::Shell,
            MessageType::CommMsg,
            content,
            metadata,
            buffers,
        );
        tracing::debug!(
            comm_id = %self.id,
            msg_type = %MessageType::CommMsg,
            msg_id = %msg.msg_id(),
            buffers = msg.buffers.len(),
            "Sending comm message"
        );
        kernel.send_shell_message(msg, false, dispose_on_done)
    }

    /// Send data with no metadata or buffers.
    pub fn send_data(&self, data: Value) -> Option<ReplyHandle> {
        self.send(data, None, Vec::new(), true)
    }

    /// Close the comm.
    ///
    /// Sends `comm_close` to the kernel, then calls the close handlers with a
    /// local copy of the close notification before returning, without
    /// waiting for the kernel to acknowledge. The channel is disposed
    /// afterwards. Returns the handle for the transmitted request, or `None`
    /// if the channel or its kernel is disposed.
    pub fn close(&mut self, data: Option<Value>, metadata: Option<JsonObject>) -> Option<ReplyHandle> {
        let Some(kernel) = self.live_kernel() else {
            tracing::trace!(
                comm_id = %self.id,
                msg_type = %MessageType::CommClose,
                "Comm is not live, skipping"
            );
            return None;
        };
        let content = json!({
            "comm_id": self.id,
            "data": data.unwrap_or_else(empty_object),
        });

        let request = Self::build(
            kernel.as_ref(),
            Channel::Shell,
            MessageType::CommClose,
            content.clone(),
            metadata.clone(),
            Vec::new(),
        );
        tracing::debug!(
            comm_id = %self.id,
            msg_type = %MessageType::CommClose,
            msg_id = %request.msg_id(),
            "Closing comm"
        );
        let reply = kernel.send_shell_message(request, false, true);

        let notice = Self::build(
            kernel.as_ref(),
            Channel::IoPub,
            MessageType::CommClose,
            content,
            metadata,
            Vec::new(),
        );
        drop(kernel);
        self.handlers.dispatch_close(&notice);
        self.dispose();
        reply
    }

    /// Deliver an incoming `comm_msg` to the message handlers.
    ///
    /// Other message types and messages addressed to another comm are
    /// ignored, as is everything after disposal.
    pub fn handle_msg(&self, msg: &Message) {
        if self.is_disposed() || !self.accepts(msg, MessageType::CommMsg) {
            return;
        }
        self.handlers.dispatch_msg(msg);
    }

    /// The kernel closed the comm.
    ///
    /// Calls the close handlers with the kernel's message and disposes the
    /// channel. Nothing is transmitted. Anything other than a `comm_close`
    /// for this comm is ignored.
    pub fn handle_close(&mut self, msg: &Message) {
        if self.is_disposed() || !self.accepts(msg, MessageType::CommClose) {
            return;
        }
        tracing::debug!(
            comm_id = %self.id,
            msg_type = %MessageType::CommClose,
            "Comm closed by kernel"
        );
        self.handlers.dispatch_close(msg);
        self.dispose();
    }

    fn accepts(&self, msg: &Message, expected: MessageType) -> bool {
        if msg.msg_type() != expected {
            tracing::trace!(
                comm_id = %self.id,
                msg_type = %msg.msg_type(),
                "Ignoring message, expected {}",
                expected
            );
            return false;
        }
        match msg.comm_id() {
            Some(id) if id != self.id => {
                tracing::warn!(comm_id = %self.id, "Ignoring message for comm {}", id);
                false
            }
            _ => true,
        }
    }

    /// Dispose the channel.
    ///
    /// Drops all handlers and the kernel reference, then runs the teardown.
    /// Calling this again has no effect.
    pub fn dispose(&mut self) {
        let State::Open { teardown, .. } = std::mem::replace(&mut self.state, State::Disposed)
        else {
            return;
        };
        self.handlers.clear();
        tracing::debug!(comm_id = %self.id, "Comm disposed");
        teardown.run();
    }
}

impl Drop for CommChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CommChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommChannel")
            .field("id", &self.id)
            .field("target_name", &self.target_name)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
