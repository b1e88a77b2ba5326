//! Comm channels driven against the in-memory kernel.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use kernel_comm::{CommChannel, CommHandler, KernelConnection, Message, Teardown};
use kernel_comm_core::{
    Channel, CommCloseContent, CommMsgContent, CommOpenContent, MessageOptions, MessageType,
};
use kernel_comm_transport::{ConnectionConfig, MemoryKernel};
use serde_json::json;

fn kernel() -> Arc<MemoryKernel> {
    MemoryKernel::new(ConnectionConfig {
        username: "alice".into(),
        session: "session-1".into(),
        ..ConnectionConfig::default()
    })
}

fn channel(kernel: &Arc<MemoryKernel>, teardowns: &Arc<AtomicUsize>) -> CommChannel {
    let conn: Arc<dyn KernelConnection> = kernel.clone();
    let counter = Arc::clone(teardowns);
    CommChannel::new(
        "echo",
        "c1",
        &conn,
        Teardown::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[derive(Default)]
struct Recorder {
    msgs: Mutex<Vec<Message>>,
    closes: Mutex<Vec<Message>>,
}

impl CommHandler for Recorder {
    fn on_msg(&self, msg: &Message) {
        self.msgs.lock().unwrap().push(msg.clone());
    }

    fn on_close(&self, msg: &Message) {
        self.closes.lock().unwrap().push(msg.clone());
    }
}

#[test]
fn test_send_then_close_scenario() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut comm = channel(&kernel, &teardowns);
    let recorder = Arc::new(Recorder::default());
    comm.subscribe(recorder.clone());

    assert!(comm.send_data(json!({ "x": 1 })).is_some());
    let sent = kernel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].msg_type(), MessageType::CommMsg);
    let content: CommMsgContent = sent[0].content_as().unwrap();
    assert_eq!(content.comm_id, "c1");
    assert_eq!(content.data, json!({ "x": 1 }));

    assert!(comm.close(None, None).is_some());
    {
        let closes = recorder.closes.lock().unwrap();
        assert_eq!(closes.len(), 1);
        let content: CommCloseContent = closes[0].content_as().unwrap();
        assert_eq!(content.comm_id, "c1");
        assert_eq!(content.data, json!({}));
    }
    assert!(comm.is_disposed());
    assert_eq!(comm.msg_handler_count(), 0);
    assert_eq!(comm.close_handler_count(), 0);

    assert!(comm.send_data(json!({ "x": 2 })).is_none());
    assert_eq!(kernel.msg_store().history_of(MessageType::CommMsg).len(), 1);
    assert_eq!(kernel.msg_store().history_of(MessageType::CommClose).len(), 1);
    assert_eq!(recorder.closes.lock().unwrap().len(), 1);
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_open_carries_target_and_data() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let comm = channel(&kernel, &teardowns);

    comm.open(Some(json!({ "init": true })), None);
    comm.open(None, None);

    let opens = kernel.msg_store().history_of(MessageType::CommOpen);
    assert_eq!(opens.len(), 2);
    for msg in &opens {
        assert_eq!(msg.channel, Channel::Shell);
        assert_eq!(msg.header.username, "alice");
        assert_eq!(msg.header.session, "session-1");
    }
    let first: CommOpenContent = opens[0].content_as().unwrap();
    assert_eq!(first.target_name, "echo");
    assert_eq!(first.data, json!({ "init": true }));
    let second: CommOpenContent = opens[1].content_as().unwrap();
    assert_eq!(second.data, json!({}));
}

#[test]
fn test_send_carries_buffers_in_order() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let comm = channel(&kernel, &teardowns);
    let buffers = vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")];

    let handle = comm
        .send(json!({ "shape": [2] }), None, buffers.clone(), false)
        .unwrap();

    assert!(!handle.dispose_on_done());
    let sent = kernel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].buffers, buffers);
}

#[tokio::test]
async fn test_reply_handles_outlive_disposal() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut comm = channel(&kernel, &teardowns);

    let handle = comm.send_data(json!({ "ping": 1 })).unwrap();
    comm.dispose();

    assert!(kernel.reply(handle.msg_id(), MessageType::CommMsg, json!({ "pong": 1 })));
    let reply = handle.reply().await.unwrap();
    assert_eq!(reply.content["pong"], 1);
}

#[test]
fn test_reply_stays_pending_until_kernel_answers() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let comm = channel(&kernel, &teardowns);

    let handle = comm.send_data(json!({ "ping": 2 })).unwrap();
    let request_id = handle.msg_id().to_string();
    let mut reply = tokio_test::task::spawn(handle.reply());
    tokio_test::assert_pending!(reply.poll());

    assert!(kernel.reply(
        &request_id,
        MessageType::Status,
        json!({ "execution_state": "idle" })
    ));
    assert!(reply.is_woken());
    let msg = tokio_test::assert_ready_ok!(reply.poll());
    assert_eq!(msg.msg_type(), MessageType::Status);
    assert_eq!(msg.parent_header.unwrap().msg_id, request_id);
}

#[test]
fn test_fire_and_forget_sends_do_not_accumulate() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut comm = channel(&kernel, &teardowns);

    drop(comm.open(None, None));
    for n in 0..1000 {
        drop(comm.send_data(json!({ "n": n })));
    }
    drop(comm.close(None, None));

    assert_eq!(kernel.sent().len(), 1002);
    assert!(kernel.pending_count() <= 1);
}

#[test]
fn test_kernel_disposal_silences_channel() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut comm = channel(&kernel, &teardowns);
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    comm.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    kernel.dispose();

    assert!(comm.open(None, None).is_none());
    assert!(comm.send_data(json!({})).is_none());
    assert!(comm.close(None, None).is_none());
    assert!(kernel.sent().is_empty());
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    // The owner tears the channel down along with the kernel.
    comm.dispose();
    assert!(comm.is_disposed());
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_incoming_traffic_reaches_all_handlers() {
    let kernel = kernel();
    let teardowns = Arc::new(AtomicUsize::new(0));
    let mut comm = channel(&kernel, &teardowns);
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    comm.subscribe(first.clone());
    comm.subscribe(second.clone());

    let incoming = |msg_type: MessageType, data: serde_json::Value| {
        Message::new(MessageOptions::new(
            Channel::IoPub,
            msg_type,
            json!({ "comm_id": "c1", "data": data }),
        ))
    };

    comm.handle_msg(&incoming(MessageType::CommMsg, json!({ "value": 42 })));
    comm.handle_close(&incoming(MessageType::CommClose, json!({ "reason": "kernel" })));
    comm.handle_msg(&incoming(MessageType::CommMsg, json!({ "value": 43 })));

    for recorder in [&first, &second] {
        let msgs = recorder.msgs.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content["data"]["value"], 42);
        assert_eq!(recorder.closes.lock().unwrap().len(), 1);
    }
    assert!(comm.is_disposed());
    assert!(kernel.sent().is_empty());
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}
