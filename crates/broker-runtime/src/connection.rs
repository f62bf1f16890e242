//! One task per connection: decode lines, feed the broker, write the outbox.

use shv_broker::{Broker, DeliverySink};
use shv_types::RpcMessage;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::outbox::Outbox;

/// Shared state every connection task needs.
pub struct ConnectionContext {
    pub broker: Arc<Broker>,
    pub outbox: Arc<Outbox>,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    ProtocolError,
    IoError,
    BrokerClosed,
    Shutdown,
}

/// Serve a connection until it closes, then release it in the broker.
///
/// Framing is one JSON encoded [`RpcMessage`] per line. A line that fails to
/// decode drops the connection.
pub async fn serve_connection<S>(
    stream: S,
    peer: String,
    context: Arc<ConnectionContext>,
    shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let broker = &context.broker;
    let id = broker.connect();
    let outbox_rx = context.outbox.register(id);
    info!(client_id = %id, peer = %peer, "Connection accepted");

    let reason = pump(stream, id, &context, outbox_rx, shutdown).await;

    context.outbox.close(id);
    context.outbox.deliver(broker.disconnect(id));
    info!(client_id = %id, ?reason, "Connection closed");
    reason
}

async fn pump<S>(
    stream: S,
    id: shv_types::ConnectionId,
    context: &ConnectionContext,
    mut outbox_rx: tokio::sync::mpsc::Receiver<RpcMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut deadline = Instant::now() + context.broker.idle_timeout(id);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                debug!(client_id = %id, "Idle timeout");
                return CloseReason::IdleTimeout;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => return CloseReason::PeerClosed,
                    Err(e) => {
                        debug!(client_id = %id, error = %e, "Read failed");
                        return CloseReason::IoError;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message: RpcMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(client_id = %id, error = %e, "Undecodable frame, dropping connection");
                        return CloseReason::ProtocolError;
                    }
                };
                let deliveries = context.broker.process(id, message);
                context.outbox.deliver(deliveries);
                deadline = Instant::now() + context.broker.idle_timeout(id);
            }
            outgoing = outbox_rx.recv() => {
                let Some(message) = outgoing else {
                    return CloseReason::BrokerClosed;
                };
                if let Err(e) = write_message(&mut writer, &message).await {
                    debug!(client_id = %id, error = %e, "Write failed");
                    return CloseReason::IoError;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return CloseReason::Shutdown;
                }
            }
        }
    }
}

async fn write_message<W>(writer: &mut W, message: &RpcMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = serde_json::to_vec(message)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await
}
