#![allow(dead_code)]

//! In-process peer network: every peer is a `ShardIndex` reachable through a
//! mock `PeerTransport` that records calls and injects faults.

use async_trait::async_trait;
use parking_lot::Mutex;
use shardex_core::store::{MemOccurrenceStore, MemPageStore};
use shardex_core::{make_occurrences, IndexEvent, IndexMeta, NoopPublisher, Page, PageDump, PageId, PeerId, ShardIndex};
use shardex_replication::{Peer, PeerError, PeerTransport};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub fn peer(id: &str, shard_id: u16) -> Peer {
    Peer { id: PeerId::new(id), hostname: format!("{id}.local"), port: 9000, shard_id }
}

pub fn empty_index() -> Arc<ShardIndex> {
    Arc::new(ShardIndex::new(
        Arc::new(MemPageStore::new()),
        Arc::new(MemOccurrenceStore::new()),
        Arc::new(NoopPublisher),
    ))
}

pub fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap()
}

/// Write a page indexed at `secs` with the given keywords; the keywords
/// double as the page's content hash.
pub fn write(index: &ShardIndex, page_id: &str, secs: i64, words: &[&str]) {
    let mut page = Page::new(PageId::new(page_id), format!("https://example.com/{page_id}"));
    page.last_indexed_at = Some(at(secs));
    page.content_hash = words.join(" ");
    let keywords: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    index.apply_replicated(&page, &make_occurrences(&page.id, &keywords)).unwrap();
}

pub fn keywords_of(index: &ShardIndex, page_id: &str) -> Vec<String> {
    index
        .occurrence_store()
        .get_for_page(&PageId::new(page_id))
        .unwrap()
        .into_keys()
        .collect()
}

pub fn indexed_at(index: &ShardIndex, page_id: &str) -> Option<OffsetDateTime> {
    index.page(&PageId::new(page_id)).ok().and_then(|p| p.last_indexed_at)
}

#[derive(Default)]
pub struct MockNet {
    nodes: Mutex<HashMap<PeerId, Arc<ShardIndex>>>,
    known_peers: Mutex<HashMap<PeerId, Vec<Peer>>>,
    down: Mutex<HashSet<PeerId>>,
    dumps_down: Mutex<HashSet<PeerId>>,
    slow: Mutex<HashSet<PeerId>>,
    pub meta_calls: Mutex<Vec<PeerId>>,
    pub dump_calls: Mutex<Vec<(PeerId, Vec<PageId>)>>,
    pub events: Mutex<Vec<(PeerId, PageId)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    send_delay: Mutex<Duration>,
}

impl MockNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn join(&self, id: &str, index: Arc<ShardIndex>) {
        self.nodes.lock().insert(PeerId::new(id), index);
    }

    pub fn set_known_peers(&self, id: &str, peers: Vec<Peer>) {
        self.known_peers.lock().insert(PeerId::new(id), peers);
    }

    /// Every call to this peer fails.
    pub fn take_down(&self, id: &str) {
        self.down.lock().insert(PeerId::new(id));
    }

    pub fn bring_up(&self, id: &str) {
        self.down.lock().remove(&PeerId::new(id));
    }

    /// Only dump requests to this peer fail.
    pub fn break_dumps(&self, id: &str) {
        self.dumps_down.lock().insert(PeerId::new(id));
    }

    /// Meta requests to this peer hang for a long time.
    pub fn slow_down(&self, id: &str) {
        self.slow.lock().insert(PeerId::new(id));
    }

    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    fn node(&self, peer: &Peer) -> Result<Arc<ShardIndex>, PeerError> {
        if self.down.lock().contains(&peer.id) {
            return Err(PeerError::Status(503));
        }
        self.nodes
            .lock()
            .get(&peer.id)
            .cloned()
            .ok_or_else(|| PeerError::Request(format!("no route to {}", peer.id)))
    }
}

#[async_trait]
impl PeerTransport for MockNet {
    async fn send_event(&self, peer: &Peer, event: &IndexEvent) -> Result<(), PeerError> {
        let down = self.down.lock().contains(&peer.id);
        if down {
            return Err(PeerError::Status(503));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.events.lock().push((peer.id.clone(), event.page.id.clone()));
        let node = self.nodes.lock().get(&peer.id).cloned();
        if let Some(index) = node {
            index
                .apply_replicated(&event.page, &event.occurrences)
                .map_err(|e| PeerError::Status(if e.is_not_found() { 404 } else { 500 }))?;
        }
        Ok(())
    }

    async fn get_index_metas(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<IndexMeta>, PeerError> {
        self.meta_calls.lock().push(peer.id.clone());
        let slow = self.slow.lock().contains(&peer.id);
        if slow {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let index = self.node(peer)?;
        index.index_metas(&peer.id, page_ids).map_err(|_| PeerError::Status(500))
    }

    async fn get_all_index_metas(&self, peer: &Peer) -> Result<Vec<IndexMeta>, PeerError> {
        self.meta_calls.lock().push(peer.id.clone());
        let index = self.node(peer)?;
        index.all_index_metas(&peer.id).map_err(|_| PeerError::Status(500))
    }

    async fn get_page_dumps(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<PageDump>, PeerError> {
        self.dump_calls.lock().push((peer.id.clone(), page_ids.to_vec()));
        if self.dumps_down.lock().contains(&peer.id) {
            return Err(PeerError::Status(500));
        }
        let index = self.node(peer)?;
        index.page_dumps(&peer.id, page_ids).map_err(|_| PeerError::Status(500))
    }

    async fn exchange_peers(&self, peer: &Peer, _local: &Peer) -> Result<Vec<Peer>, PeerError> {
        if self.down.lock().contains(&peer.id) {
            return Err(PeerError::Status(503));
        }
        Ok(self.known_peers.lock().get(&peer.id).cloned().unwrap_or_default())
    }
}
