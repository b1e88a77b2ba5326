//! Kernel connection abstraction consumed by comms.

use crate::{Message, ReplyHandle};

/// A live link to a kernel session.
///
/// Comms hold a non-owning reference to the connection and only read its
/// identity or ask it to transmit; they never mutate its state.
pub trait KernelConnection: Send + Sync {
    /// Username stamped on outgoing messages.
    fn username(&self) -> String;

    /// Session (client) identifier stamped on outgoing messages.
    fn session(&self) -> String;

    /// Whether the connection has been torn down.
    fn is_disposed(&self) -> bool;

    /// Send a message on the shell (request) channel.
    ///
    /// `expect_reply` asks the transport to track a reply for the request.
    /// `dispose_on_done` asks it to tear the returned handle down once the
    /// reply cycle completes. Returns `None` if nothing was sent.
    fn send_shell_message(
        &self,
        msg: Message,
        expect_reply: bool,
        dispose_on_done: bool,
    ) -> Option<ReplyHandle>;
}
