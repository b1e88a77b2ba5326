//! Handler registration for comm events.

use std::sync::Arc;

use kernel_comm_core::Message;

/// Receives events for a single comm.
///
/// Both methods default to no-ops, so implementors only override the
/// events they care about.
pub trait CommHandler: Send + Sync {
    /// A `comm_msg` arrived for this comm.
    fn on_msg(&self, _msg: &Message) {}

    /// The comm was closed, locally or by the kernel.
    fn on_close(&self, _msg: &Message) {}
}

/// Identifies a registered handler so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct MsgFn<F>(F);

impl<F> CommHandler for MsgFn<F>
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_msg(&self, msg: &Message) {
        (self.0)(msg);
    }
}

struct CloseFn<F>(F);

impl<F> CommHandler for CloseFn<F>
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_close(&self, msg: &Message) {
        (self.0)(msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Events {
    Msg,
    Close,
    All,
}

type Entry = (HandlerId, Arc<dyn CommHandler>);

/// Ordered handler registries for the two comm events.
#[derive(Default)]
pub(crate) struct HandlerSet {
    next_id: u64,
    msg: Vec<Entry>,
    close: Vec<Entry>,
}

impl HandlerSet {
    pub(crate) fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    pub(crate) fn insert(&mut self, id: HandlerId, handler: Arc<dyn CommHandler>, events: Events) {
        if matches!(events, Events::Msg | Events::All) {
            self.msg.push((id, Arc::clone(&handler)));
        }
        if matches!(events, Events::Close | Events::All) {
            self.close.push((id, handler));
        }
    }

    pub(crate) fn insert_msg_fn<F>(&mut self, id: HandlerId, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.insert(id, Arc::new(MsgFn(f)), Events::Msg);
    }

    pub(crate) fn insert_close_fn<F>(&mut self, id: HandlerId, f: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.insert(id, Arc::new(CloseFn(f)), Events::Close);
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.msg.len() + self.close.len();
        self.msg.retain(|(entry, _)| *entry != id);
        self.close.retain(|(entry, _)| *entry != id);
        before != self.msg.len() + self.close.len()
    }

    pub(crate) fn dispatch_msg(&self, msg: &Message) {
        for (_, handler) in &self.msg {
            handler.on_msg(msg);
        }
    }

    pub(crate) fn dispatch_close(&self, msg: &Message) {
        for (_, handler) in &self.close {
            handler.on_close(msg);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.msg.clear();
        self.close.clear();
    }

    pub(crate) fn msg_count(&self) -> usize {
        self.msg.len()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.close.len()
    }
}
