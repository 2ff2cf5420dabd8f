//! Periodic full-sync requests, layered on top of `Node`'s own
//! rate-limited, reactively-triggered resync path.

use std::sync::Arc;
use std::time::Duration;

use super::node::Node;

pub struct SyncScheduler {
    node: Arc<Node>,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(node: Arc<Node>, interval: Duration) -> Self {
        Self { node, interval }
    }

    /// Runs until the process exits. Each tick only awaits a rate-limited
    /// request send; it never holds a peer-registry guard across `.await`.
    pub async fn start(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.node.request_full_sync_any().await;
        }
    }
}
