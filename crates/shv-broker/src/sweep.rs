//! Periodic expiry of subscriptions and forwarded requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::ports::{BrokerApi, DeliverySink};

/// Run [`BrokerApi::sweep`] every `interval` until `shutdown` flips to true.
pub async fn run_sweep(
    broker: Arc<dyn BrokerApi>,
    sink: Arc<dyn DeliverySink>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let deliveries = broker.sweep();
                if !deliveries.is_empty() {
                    debug!(count = deliveries.len(), "Expired forwarded requests");
                    sink.deliver(deliveries);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Sweep task stopped");
                    return;
                }
            }
        }
    }
}
