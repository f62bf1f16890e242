//! Routing of broker deliveries to connection tasks.

use dashmap::DashMap;
use shv_broker::{Delivery, DeliverySink};
use shv_types::{ConnectionId, RpcMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Messages queued per connection before it is considered stuck.
pub const OUTBOX_CAPACITY: usize = 256;

/// Holds the single sender of every connection's outbound queue.
///
/// Dropping a sender closes the queue: the connection task writes what is
/// still buffered and then ends, so a reply queued right before a
/// `Disconnect` still reaches the peer.
#[derive(Debug, Default)]
pub struct Outbox {
    senders: DashMap<ConnectionId, mpsc::Sender<RpcMessage>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the queue for a new connection.
    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<RpcMessage> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.senders.insert(connection, tx);
        rx
    }

    /// Close the queue of a connection.
    pub fn close(&self, connection: ConnectionId) -> bool {
        self.senders.remove(&connection).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl DeliverySink for Outbox {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Message { to, message } => {
                    let Some(sender) = self.senders.get(&to).map(|s| s.clone()) else {
                        debug!(client_id = %to, "Delivery to closed connection dropped");
                        continue;
                    };
                    match sender.try_send(message) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(client_id = %to, "Outbox full, dropping connection");
                            self.close(to);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            self.close(to);
                        }
                    }
                }
                Delivery::Disconnect(connection) => {
                    debug!(client_id = %connection, "Closing connection on broker request");
                    self.close(connection);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shv_types::RpcResponse;

    fn message(rid: i64) -> RpcMessage {
        RpcMessage::Response(RpcResponse::success(rid, serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_reply_before_disconnect_is_kept() {
        let outbox = Outbox::new();
        let id = ConnectionId(1);
        let mut rx = outbox.register(id);

        outbox.deliver(vec![
            Delivery::Message { to: id, message: message(1) },
            Delivery::Disconnect(id),
        ]);

        assert_eq!(rx.recv().await, Some(message(1)));
        assert_eq!(rx.recv().await, None);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_full_outbox_closes() {
        let outbox = Outbox::new();
        let id = ConnectionId(7);
        let _rx = outbox.register(id);
        let flood = (0..=OUTBOX_CAPACITY as i64)
            .map(|rid| Delivery::Message { to: id, message: message(rid) })
            .collect();
        outbox.deliver(flood);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_unknown_target_ignored() {
        let outbox = Outbox::new();
        outbox.deliver(vec![Delivery::Message {
            to: ConnectionId(9),
            message: message(1),
        }]);
        assert!(outbox.is_empty());
    }
}
