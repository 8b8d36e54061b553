//! Harness helpers shared by the scenario runner and tests

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use statecast_state::{Status, StatusFuture};
use statecast_transport::{Port, PortChannel};
use tracing_subscriber::EnvFilter;

/// How long `settle` waits for queued port deliveries
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Install a test-friendly subscriber, filtered by `RUST_LOG`.
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Give the port dispatch tasks a chance to drain
pub async fn settle() {
    tokio::time::sleep(SETTLE_DELAY).await;
}

/// Await a future for at most `limit`
pub async fn resolves_within<V: Clone>(future: StatusFuture<V>, limit: Duration) -> Option<V> {
    tokio::time::timeout(limit, future).await.ok()
}

/// Panic unless `future` is still pending after `limit`
pub async fn assert_pending<V: Clone + Debug>(future: &StatusFuture<V>, limit: Duration) {
    if let Some(value) = resolves_within(future.clone(), limit).await {
        panic!("expected a pending future, got {:?}", value);
    }
    assert_eq!(future.status(), Status::Pending);
}

/// Two ports wired back to back
///
/// The source side receives on `upstream` and sends to `downstream`; the sink
/// side does the opposite, so neither binding hears its own messages.
#[derive(Debug, Clone)]
pub struct SessionPair {
    pub upstream: Arc<Port>,
    pub downstream: Arc<Port>,
}

impl SessionPair {
    /// Must be called from within a tokio runtime
    pub fn new() -> Self {
        SessionPair {
            upstream: Port::spawn(),
            downstream: Port::spawn(),
        }
    }

    pub fn source_channel(&self) -> PortChannel {
        PortChannel::new(Arc::clone(&self.upstream), Arc::clone(&self.downstream))
    }

    pub fn sink_channel(&self) -> PortChannel {
        PortChannel::new(Arc::clone(&self.downstream), Arc::clone(&self.upstream))
    }
}

impl Default for SessionPair {
    fn default() -> Self {
        Self::new()
    }
}
