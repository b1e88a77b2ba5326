//! Echo comm against an in-memory kernel.
//!
//! Run with: cargo run -p echo-comm-demo
//!
//! Set `RUST_LOG=debug` to see every message on the wire.

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures::StreamExt;
use kernel_comm::{CommChannel, KernelConnection, Teardown};
use kernel_comm_core::{Channel, CommMsgContent, Message, MessageOptions, MessageType};
use kernel_comm_transport::{ConnectionConfig, MemoryKernel, WireMessage};
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ConnectionConfig::from_env().context("Invalid kernel comm configuration")?;
    tracing::info!(
        "Connecting as {} (session {})",
        config.username,
        config.session
    );
    let kernel = MemoryKernel::new(config);

    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel();
    let kernel_task = tokio::spawn(run_echo_kernel(Arc::clone(&kernel), echo_tx));

    let conn: Arc<dyn KernelConnection> = kernel.clone();
    let mut comm = CommChannel::new(
        "echo",
        "demo-comm",
        &conn,
        Teardown::new(|| tracing::info!("Comm torn down")),
    );
    comm.on_msg(|msg| tracing::info!("Echo received: {}", msg.content["data"]));
    comm.on_close(|msg| tracing::info!("Comm closed: {}", msg.content["data"]));

    comm.open(Some(json!({ "greeting": "hello" })), None)
        .context("Kernel connection is not live")?;

    let handle = comm
        .send(
            json!({ "x": 1 }),
            None,
            vec![Bytes::from_static(b"payload")],
            true,
        )
        .context("Comm is not live")?;
    let reply = handle.reply().await?;
    tracing::info!(
        "Kernel finished {} with {}",
        reply
            .parent_header
            .as_ref()
            .map_or("<unknown>", |h| h.msg_id.as_str()),
        reply.content
    );

    // The demo plays the dispatcher: echoes for this comm go straight to it.
    if let Some(echo) = echo_rx.recv().await {
        comm.handle_msg(&echo);
    }

    comm.close(Some(json!({ "reason": "demo finished" })), None);
    kernel_task.await?;
    kernel.dispose();

    Ok(())
}

/// Kernel side of the demo: echo every `comm_msg` back and go idle.
async fn run_echo_kernel(kernel: Arc<MemoryKernel>, echo_tx: mpsc::UnboundedSender<Message>) {
    let mut stream = kernel.msg_store().history_plus_stream();

    while let Some(msg) = stream.next().await {
        match WireMessage::encode(&msg) {
            Ok(json) => tracing::debug!("wire: {json}"),
            Err(e) => tracing::error!("Failed to encode message: {e}"),
        }

        match msg.msg_type() {
            MessageType::CommMsg => {
                let content = match msg.content_as::<CommMsgContent>() {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::warn!("Dropping malformed comm_msg: {e}");
                        continue;
                    }
                };
                let mut echo = Message::new(
                    MessageOptions::new(
                        Channel::IoPub,
                        MessageType::CommMsg,
                        json!({ "comm_id": content.comm_id, "data": content.data }),
                    )
                    .identity("kernel", msg.header.session.clone())
                    .buffers(msg.buffers.clone()),
                );
                echo.parent_header = Some(msg.header.clone());
                let _ = echo_tx.send(echo);
                kernel.reply(
                    msg.msg_id(),
                    MessageType::Status,
                    json!({ "execution_state": "idle" }),
                );
            }
            MessageType::CommClose => break,
            _ => {}
        }
    }
}
