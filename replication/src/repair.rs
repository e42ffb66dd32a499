//! Anti-entropy repair between replicas of one shard.
//!
//! A repair batch runs in two phases. Phase one asks every same-shard peer for
//! its index metas of the batch and picks, per page, the replica with the
//! newest LastIndexedAt (ties go to the smallest peer id, the local node
//! included). A replica already holding the winner's clock and content hash
//! is left alone. Phase two pulls page dumps from each winning peer for
//! exactly the pages it won. Nothing is written until both phases succeed, so a
//! single peer failure abandons the batch without partial application.

use crate::peer::{Peer, PeerDirectory};
use crate::transport::{with_timeout, PeerError, PeerTransport};
use futures::stream::{self, StreamExt, TryStreamExt};
use shardex_core::store::RepairJobStore;
use shardex_core::{Applied, IndexMeta, PageDump, PageId, PeerId, RepairJob, RepairJobStatus, ShardIndex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("peer {peer_id}: {source}")]
    Peer {
        peer_id: PeerId,
        #[source]
        source: PeerError,
    },
    #[error("winning peer {0} is no longer known")]
    UnknownPeer(PeerId),
    #[error("invalid dump from {peer_id}: {reason}")]
    InvalidDump { peer_id: PeerId, reason: String },
    #[error("peer {peer_id} sent no dump for page {page_id}")]
    MissingDump { peer_id: PeerId, page_id: PageId },
    #[error(transparent)]
    Store(#[from] shardex_core::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub requested: usize,
    /// Pages whose state was pulled from a peer and written locally.
    pub repaired: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRunReport {
    pub complete: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub local_pages: usize,
    pub stale: usize,
    pub repaired: usize,
    pub failed_batches: usize,
}

/// Winning replica for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub peer_id: PeerId,
    pub last_indexed_at: OffsetDateTime,
    pub content_hash: String,
}

impl Winner {
    fn beats(&self, other: &Winner) -> bool {
        match self.last_indexed_at.cmp(&other.last_indexed_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.peer_id < other.peer_id,
        }
    }
}

/// Fold metas from every replica into one winner per page.
pub fn pick_winners<'a>(metas: impl IntoIterator<Item = &'a IndexMeta>) -> BTreeMap<PageId, Winner> {
    let mut winners: BTreeMap<PageId, Winner> = BTreeMap::new();
    for meta in metas {
        let candidate = Winner {
            peer_id: meta.peer_id.clone(),
            last_indexed_at: meta.last_indexed_at,
            content_hash: meta.content_hash.clone(),
        };
        match winners.get(&meta.page_id) {
            Some(current) if !candidate.beats(current) => {}
            _ => {
                winners.insert(meta.page_id.clone(), candidate);
            }
        }
    }
    winners
}

pub struct RepairCoordinator {
    index: Arc<ShardIndex>,
    directory: Arc<PeerDirectory>,
    transport: Arc<dyn PeerTransport>,
    jobs: Arc<dyn RepairJobStore>,
    concurrency: usize,
    timeout: Duration,
    batch_size: usize,
}

impl RepairCoordinator {
    pub fn new(
        index: Arc<ShardIndex>,
        directory: Arc<PeerDirectory>,
        transport: Arc<dyn PeerTransport>,
        jobs: Arc<dyn RepairJobStore>,
    ) -> Self {
        Self {
            index,
            directory,
            transport,
            jobs,
            concurrency: crate::broadcast::DEFAULT_CONCURRENCY,
            timeout: crate::broadcast::DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn local_id(&self) -> &PeerId {
        &self.directory.local().id
    }

    // serving side

    pub fn index_metas(&self, ids: &[PageId]) -> shardex_core::Result<Vec<IndexMeta>> {
        self.index.index_metas(self.local_id(), ids)
    }

    pub fn all_index_metas(&self) -> shardex_core::Result<Vec<IndexMeta>> {
        self.index.all_index_metas(self.local_id())
    }

    pub fn page_dumps(&self, ids: &[PageId]) -> shardex_core::Result<Vec<PageDump>> {
        self.index.page_dumps(self.local_id(), ids)
    }

    // job queue

    /// Queue a repair job per page. Pages already pending, running or
    /// complete keep their job; failed jobs go back to pending.
    pub fn enqueue(&self, ids: &[PageId]) -> shardex_core::Result<Vec<RepairJob>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let job = match self.jobs.get(id) {
                Ok(mut job) => {
                    if job.status == RepairJobStatus::Failed {
                        job.transition(RepairJobStatus::Pending);
                        self.jobs.save(&job)?;
                    }
                    job
                }
                Err(e) if e.is_not_found() => {
                    let job = RepairJob::pending(id.clone());
                    self.jobs.save(&job)?;
                    job
                }
                Err(e) => return Err(e),
            };
            out.push(job);
        }
        Ok(out)
    }

    pub fn job(&self, id: &PageId) -> shardex_core::Result<RepairJob> {
        self.jobs.get(id)
    }

    /// Put jobs left running by a previous process back in the queue.
    pub fn recover_interrupted(&self) -> shardex_core::Result<usize> {
        let running = self.jobs.list_by_status(RepairJobStatus::Running)?;
        for mut job in running.iter().cloned() {
            job.transition(RepairJobStatus::Pending);
            self.jobs.save(&job)?;
        }
        if !running.is_empty() {
            tracing::info!(count = running.len(), "requeued interrupted repair jobs");
        }
        Ok(running.len())
    }

    /// Drain pending jobs in batches. A failed batch marks its jobs failed and
    /// the next batch still runs.
    pub async fn run_pending(&self) -> shardex_core::Result<JobRunReport> {
        let pending = self.jobs.list_by_status(RepairJobStatus::Pending)?;
        let mut report = JobRunReport::default();
        for batch in pending.chunks(self.batch_size) {
            self.mark(batch, RepairJobStatus::Running)?;
            let ids: Vec<PageId> = batch.iter().map(|j| j.page_id.clone()).collect();
            match self.repair(&ids).await {
                Ok(_) => {
                    self.mark(batch, RepairJobStatus::Complete)?;
                    report.complete += batch.len();
                }
                Err(e) => {
                    tracing::error!(pages = ids.len(), error = %e, "repair batch failed");
                    self.mark(batch, RepairJobStatus::Failed)?;
                    report.failed += batch.len();
                }
            }
        }
        Ok(report)
    }

    fn mark(&self, batch: &[RepairJob], status: RepairJobStatus) -> shardex_core::Result<()> {
        for job in batch {
            let mut job = job.clone();
            job.transition(status);
            self.jobs.save(&job)?;
        }
        Ok(())
    }

    // repair

    /// Bring the given pages up to the newest state held by any same-shard
    /// replica.
    pub async fn repair(&self, ids: &[PageId]) -> Result<RepairReport, RepairError> {
        let mut report = RepairReport { requested: ids.len(), repaired: 0 };
        if ids.is_empty() {
            return Ok(report);
        }
        let peers = self.directory.shard_peers();
        if peers.is_empty() {
            tracing::debug!(pages = ids.len(), "no shard peers, nothing to repair from");
            return Ok(report);
        }
        let wanted: HashSet<&PageId> = ids.iter().collect();

        // phase one: metas from every replica, joined before choosing
        let remote: Vec<Vec<IndexMeta>> = stream::iter(peers)
            .map(|peer| self.fetch_metas(peer, ids))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let local = self.index_metas(ids)?;
        let current: HashMap<&PageId, &IndexMeta> = local.iter().map(|m| (&m.page_id, m)).collect();
        let all = local
            .iter()
            .chain(remote.iter().flatten())
            .filter(|m| wanted.contains(&m.page_id));
        let winners = pick_winners(all);

        let mut by_peer: BTreeMap<PeerId, Vec<PageId>> = BTreeMap::new();
        for (page_id, winner) in winners {
            if &winner.peer_id == self.local_id() {
                continue;
            }
            if current.get(&page_id).is_some_and(|mine| already_holds(mine, &winner)) {
                continue;
            }
            by_peer.entry(winner.peer_id).or_default().push(page_id);
        }
        if by_peer.is_empty() {
            return Ok(report);
        }

        // phase two: dumps from winners, only for the pages each one won
        let mut assignments = Vec::with_capacity(by_peer.len());
        for (peer_id, pages) in by_peer {
            let peer = self.directory.get(&peer_id).ok_or(RepairError::UnknownPeer(peer_id))?;
            assignments.push((peer, pages));
        }
        let dumps: Vec<Vec<PageDump>> = stream::iter(assignments)
            .map(|(peer, pages)| self.fetch_dumps(peer, pages))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        for dump in dumps.into_iter().flatten() {
            match self.index.apply_replicated(&dump.page, &dump.keyword_occurrences)? {
                Applied::Written => report.repaired += 1,
                Applied::Stale => {}
            }
        }
        tracing::info!(requested = report.requested, repaired = report.repaired, "repair batch applied");
        Ok(report)
    }

    async fn fetch_metas(&self, peer: Peer, ids: &[PageId]) -> Result<Vec<IndexMeta>, RepairError> {
        let metas = with_timeout(self.timeout, self.transport.get_index_metas(&peer, ids))
            .await
            .map_err(|source| RepairError::Peer { peer_id: peer.id.clone(), source })?;
        // attribute to the peer that answered, whatever it claims
        Ok(metas
            .into_iter()
            .map(|m| IndexMeta { peer_id: peer.id.clone(), ..m })
            .collect())
    }

    async fn fetch_dumps(&self, peer: Peer, pages: Vec<PageId>) -> Result<Vec<PageDump>, RepairError> {
        let dumps = with_timeout(self.timeout, self.transport.get_page_dumps(&peer, &pages))
            .await
            .map_err(|source| RepairError::Peer { peer_id: peer.id.clone(), source })?;
        validate_dumps(&peer.id, &pages, dumps)
    }

    // audit

    /// Compare every local page with what each shard peer holds and repair
    /// the pages some peer has newer (or that are missing locally).
    pub async fn audit(&self) -> Result<AuditReport, RepairError> {
        let local = self.all_index_metas()?;
        let mut report = AuditReport { local_pages: local.len(), ..AuditReport::default() };
        let peers = self.directory.shard_peers();
        if peers.is_empty() {
            return Ok(report);
        }

        let transport = &self.transport;
        let limit = self.timeout;
        let remote: Vec<Vec<IndexMeta>> = stream::iter(peers)
            .map(|peer| async move {
                with_timeout(limit, transport.get_all_index_metas(&peer))
                    .await
                    .map_err(|source| RepairError::Peer { peer_id: peer.id.clone(), source })
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let local_id = self.local_id();
        let mine: HashMap<&PageId, &IndexMeta> = local.iter().map(|m| (&m.page_id, m)).collect();
        let mut stale: Vec<PageId> = remote
            .iter()
            .flatten()
            .filter(|m| match mine.get(&m.page_id) {
                Some(own) => {
                    m.last_indexed_at > own.last_indexed_at
                        || (m.last_indexed_at == own.last_indexed_at
                            && m.content_hash != own.content_hash
                            && m.peer_id < *local_id)
                }
                None => true,
            })
            .map(|m| m.page_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        stale.sort();
        report.stale = stale.len();

        for batch in stale.chunks(self.batch_size) {
            match self.repair(batch).await {
                Ok(r) => report.repaired += r.repaired,
                Err(e) => {
                    report.failed_batches += 1;
                    tracing::error!(pages = batch.len(), error = %e, "audit repair batch failed");
                }
            }
        }
        tracing::info!(
            local_pages = report.local_pages,
            stale = report.stale,
            repaired = report.repaired,
            failed_batches = report.failed_batches,
            "audit complete"
        );
        Ok(report)
    }
}

/// Local state already matches the winner. Equal clocks over different
/// content still pull, so the tie winner's copy spreads.
fn already_holds(mine: &IndexMeta, winner: &Winner) -> bool {
    match mine.last_indexed_at.cmp(&winner.last_indexed_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => mine.content_hash == winner.content_hash,
        std::cmp::Ordering::Less => false,
    }
}

/// Every requested page must come back exactly once, from the peer asked,
/// with occurrences that belong to it.
fn validate_dumps(peer_id: &PeerId, requested: &[PageId], dumps: Vec<PageDump>) -> Result<Vec<PageDump>, RepairError> {
    let invalid = |reason: String| RepairError::InvalidDump { peer_id: peer_id.clone(), reason };
    let wanted: HashSet<&PageId> = requested.iter().collect();
    let mut seen: HashSet<PageId> = HashSet::with_capacity(dumps.len());
    let mut out = Vec::with_capacity(requested.len());

    for dump in dumps {
        if &dump.peer_id != peer_id {
            return Err(invalid(format!("dump for {} claims peer {}", dump.page_id, dump.peer_id)));
        }
        if dump.page.id != dump.page_id {
            return Err(invalid(format!("dump for {} carries page {}", dump.page_id, dump.page.id)));
        }
        if !wanted.contains(&dump.page_id) {
            return Err(invalid(format!("unrequested page {}", dump.page_id)));
        }
        if let Some(occ) = dump.keyword_occurrences.values().find(|o| o.page_id != dump.page_id) {
            return Err(invalid(format!("occurrence of {} inside dump for {}", occ.page_id, dump.page_id)));
        }
        if !seen.insert(dump.page_id.clone()) {
            return Err(invalid(format!("duplicate dump for {}", dump.page_id)));
        }
        out.push(dump);
    }
    if let Some(missing) = requested.iter().find(|id| !seen.contains(*id)) {
        return Err(RepairError::MissingDump { peer_id: peer_id.clone(), page_id: missing.clone() });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardex_core::make_occurrences;
    use shardex_core::Page;

    fn meta(page: &str, peer: &str, secs: i64) -> IndexMeta {
        IndexMeta {
            page_id: PageId::new(page),
            peer_id: PeerId::new(peer),
            last_indexed_at: OffsetDateTime::from_unix_timestamp(secs).unwrap(),
            content_hash: String::new(),
        }
    }

    fn dump(page: &str, peer: &str) -> PageDump {
        let page_id = PageId::new(page);
        PageDump {
            peer_id: PeerId::new(peer),
            page_id: page_id.clone(),
            page: Page::new(page_id.clone(), "https://example.com/"),
            keyword_occurrences: make_occurrences(&page_id, &["rust".to_string()]),
        }
    }

    #[test]
    fn newest_timestamp_wins() {
        let metas = [meta("p1", "a", 1), meta("p1", "b", 10), meta("p2", "a", 3)];
        let winners = pick_winners(&metas);
        assert_eq!(winners[&PageId::new("p1")].peer_id, PeerId::new("b"));
        assert_eq!(winners[&PageId::new("p2")].peer_id, PeerId::new("a"));
    }

    #[test]
    fn ties_go_to_smallest_peer_id_in_any_order() {
        let forward = [meta("p1", "b", 5), meta("p1", "a", 5), meta("p1", "c", 5)];
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(pick_winners(&forward)[&PageId::new("p1")].peer_id, PeerId::new("a"));
        assert_eq!(pick_winners(&backward)[&PageId::new("p1")].peer_id, PeerId::new("a"));
    }

    #[test]
    fn missing_dump_is_an_error() {
        let requested = [PageId::new("p1"), PageId::new("p2")];
        let err = validate_dumps(&PeerId::new("a"), &requested, vec![dump("p1", "a")]).unwrap_err();
        assert!(matches!(err, RepairError::MissingDump { page_id, .. } if page_id == PageId::new("p2")));
    }

    #[test]
    fn dumps_from_wrong_peer_or_page_are_rejected() {
        let requested = [PageId::new("p1")];
        let err = validate_dumps(&PeerId::new("a"), &requested, vec![dump("p1", "b")]).unwrap_err();
        assert!(matches!(err, RepairError::InvalidDump { .. }));

        let err = validate_dumps(&PeerId::new("a"), &requested, vec![dump("p9", "a")]).unwrap_err();
        assert!(matches!(err, RepairError::InvalidDump { .. }));

        let mut foreign = dump("p1", "a");
        foreign.keyword_occurrences = make_occurrences(&PageId::new("p9"), &["x".to_string()]);
        let err = validate_dumps(&PeerId::new("a"), &requested, vec![foreign]).unwrap_err();
        assert!(matches!(err, RepairError::InvalidDump { .. }));
    }
}
