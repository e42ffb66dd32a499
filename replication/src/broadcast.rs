//! Fan-out of index-updated events and peer discovery.

use crate::peer::{Peer, PeerDirectory};
use crate::transport::{with_timeout, PeerError, PeerTransport};
use futures::stream::{self, StreamExt};
use shardex_core::{IndexEvent, IndexEventPublisher};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Pushes index-updated events to every same-shard peer, at most
/// `concurrency` requests in flight. Delivery is best effort: failures are
/// logged and left for repair to reconcile.
#[derive(Clone)]
pub struct Broadcaster {
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn PeerTransport>,
    concurrency: usize,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(directory: Arc<PeerDirectory>, transport: Arc<dyn PeerTransport>) -> Self {
        Self { directory, transport, concurrency: DEFAULT_CONCURRENCY, timeout: DEFAULT_TIMEOUT }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns once every send has finished or timed out.
    pub async fn broadcast(&self, event: &IndexEvent) -> BroadcastReport {
        let peers = self.directory.shard_peers();
        if peers.is_empty() {
            return BroadcastReport::default();
        }
        let transport = &self.transport;
        let limit = self.timeout;
        let outcomes: Vec<(Peer, Result<(), PeerError>)> = stream::iter(peers)
            .map(|peer| async move {
                let result = with_timeout(limit, transport.send_event(&peer, event)).await;
                (peer, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BroadcastReport::default();
        for (peer, result) in outcomes {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(peer = %peer, page_id = %event.page.id, error = %e, "event delivery failed");
                }
            }
        }
        tracing::debug!(page_id = %event.page.id, delivered = report.delivered, failed = report.failed, "broadcast done");
        report
    }

    /// Exchange descriptors with every known peer and merge what they know.
    /// Returns the number of peers that were new to this node.
    pub async fn discover_peers(&self) -> usize {
        let local = self.directory.local().clone();
        let transport = &self.transport;
        let limit = self.timeout;
        let local_ref = &local;
        let answers: Vec<(Peer, Result<Vec<Peer>, PeerError>)> = stream::iter(self.directory.peers())
            .map(|peer| async move {
                let result = with_timeout(limit, transport.exchange_peers(&peer, local_ref)).await;
                (peer, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut added = 0;
        for (peer, result) in answers {
            match result {
                Ok(known) => added += self.directory.merge(known),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "peer exchange failed"),
            }
        }
        if added > 0 {
            tracing::info!(added, total = self.directory.len(), "discovered peers");
        }
        added
    }
}

impl IndexEventPublisher for Broadcaster {
    /// Detached: the local write never waits on peers.
    fn publish(&self, event: IndexEvent) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(page_id = %event.page.id, "no async runtime, event not broadcast");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            this.broadcast(&event).await;
        });
    }
}
