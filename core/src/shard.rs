//! Write façade over the page and occurrence stores of one shard replica.
//!
//! Two entry points mutate a page: [`ShardIndex::update`] for local re-index
//! results, which publishes an [`IndexEvent`] to peers, and
//! [`ShardIndex::apply_replicated`] for state received from peers, which never
//! publishes. Keeping them apart is what stops update cycles between replicas.

use crate::error::{Error, Result};
use crate::index::{IndexEvent, IndexMeta, KeywordOccurrences, Page, PageDump, PageId, PeerId};
use crate::store::{OccurrenceStore, PageStore};
use parking_lot::Mutex;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Smallest advance applied when a local write must move past a stored clock.
const CLOCK_STEP: Duration = Duration::milliseconds(1);

/// Receives index-updated events after local writes. Must not block.
pub trait IndexEventPublisher: Send + Sync {
    fn publish(&self, event: IndexEvent);
}

/// Publisher for nodes (and tools) that run without peers.
pub struct NoopPublisher;

impl IndexEventPublisher for NoopPublisher {
    fn publish(&self, _event: IndexEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Written,
    /// Local copy is newer; the incoming state was dropped.
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub pages: usize,
    pub keywords: usize,
}

pub struct ShardIndex {
    pages: Arc<dyn PageStore>,
    occurrences: Arc<dyn OccurrenceStore>,
    publisher: Arc<dyn IndexEventPublisher>,
    // serialises page-level replace so readers never see two writers interleaved
    write_lock: Mutex<()>,
}

impl ShardIndex {
    pub fn new(
        pages: Arc<dyn PageStore>,
        occurrences: Arc<dyn OccurrenceStore>,
        publisher: Arc<dyn IndexEventPublisher>,
    ) -> Self {
        Self { pages, occurrences, publisher, write_lock: Mutex::new(()) }
    }

    pub fn page_store(&self) -> Arc<dyn PageStore> {
        self.pages.clone()
    }

    pub fn occurrence_store(&self) -> Arc<dyn OccurrenceStore> {
        self.occurrences.clone()
    }

    pub fn page(&self, id: &PageId) -> Result<Page> {
        self.pages.get(id)
    }

    /// Persist a page created by the crawl side, without occurrences.
    pub fn create_page(&self, page: &Page) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.pages.save(page)
    }

    /// Local write path: full replace of the page and its occurrence set,
    /// then an index-updated event for peers.
    ///
    /// The clock is settled under the write lock: if the stored page is at or
    /// past the proposed `last_indexed_at` (a replicated write landed while the
    /// caller was extracting), the stored clock is advanced by one step
    /// instead. Returns the page as written.
    pub fn update(&self, page: &Page, occurrences: &KeywordOccurrences) -> Result<Page> {
        let page = {
            let _guard = self.write_lock.lock();
            let mut page = page.clone();
            page.last_indexed_at = self.settle_clock(&page)?;
            self.replace(&page, occurrences)?;
            page
        };
        self.publisher.publish(IndexEvent { page: page.clone(), occurrences: occurrences.clone() });
        Ok(page)
    }

    fn settle_clock(&self, page: &Page) -> Result<Option<OffsetDateTime>> {
        let stored = match self.pages.get(&page.id) {
            Ok(current) => current.last_indexed_at,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok(match (stored, page.last_indexed_at) {
            (Some(prev), Some(proposed)) if prev >= proposed => {
                tracing::debug!(page_id = %page.id, "stored clock is ahead, advancing past it");
                Some(prev + CLOCK_STEP)
            }
            (Some(prev), None) => Some(prev + CLOCK_STEP),
            (_, proposed) => proposed,
        })
    }

    /// Quiet write path for state pulled or pushed from peers. Older state
    /// than what is stored locally is ignored; equal state is overwritten.
    pub fn apply_replicated(&self, page: &Page, occurrences: &KeywordOccurrences) -> Result<Applied> {
        let _guard = self.write_lock.lock();
        match self.pages.get(&page.id) {
            Ok(current) if current.last_indexed_at > page.last_indexed_at => {
                tracing::debug!(page_id = %page.id, "ignoring stale replicated page");
                return Ok(Applied::Stale);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.replace(page, occurrences)?;
        Ok(Applied::Written)
    }

    pub fn delete_page(&self, id: &PageId) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.occurrences.remove_for_page(id)?;
        self.pages.delete(id)
    }

    fn replace(&self, page: &Page, occurrences: &KeywordOccurrences) -> Result<()> {
        if let Some((keyword, occ)) = occurrences.iter().find(|(_, o)| o.page_id != page.id) {
            return Err(Error::Validation(format!(
                "occurrence for {keyword:?} belongs to {} not {}",
                occ.page_id, page.id
            )));
        }
        // page last: a torn write keeps the old clock, so repair still sees it as behind
        self.occurrences.replace_for_page(&page.id, occurrences)?;
        self.pages.save(page)
    }

    /// Metas for the requested pages that have been indexed at least once.
    pub fn index_metas(&self, self_id: &PeerId, ids: &[PageId]) -> Result<Vec<IndexMeta>> {
        let pages = self.pages.get_many(ids)?;
        let mut metas: Vec<IndexMeta> = pages.into_values().filter_map(|p| meta_of(self_id, &p)).collect();
        metas.sort_by(|a, b| a.page_id.cmp(&b.page_id));
        Ok(metas)
    }

    pub fn all_index_metas(&self, self_id: &PeerId) -> Result<Vec<IndexMeta>> {
        let mut metas: Vec<IndexMeta> = self
            .pages
            .get_all()?
            .iter()
            .filter_map(|p| meta_of(self_id, p))
            .collect();
        metas.sort_by(|a, b| a.page_id.cmp(&b.page_id));
        Ok(metas)
    }

    /// Page plus full occurrence set for each requested page; ids with no
    /// stored page are skipped.
    pub fn page_dumps(&self, self_id: &PeerId, ids: &[PageId]) -> Result<Vec<PageDump>> {
        let _guard = self.write_lock.lock();
        let mut dumps = Vec::with_capacity(ids.len());
        for id in ids {
            let page = match self.pages.get(id) {
                Ok(p) => p,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let keyword_occurrences = self.occurrences.get_for_page(id)?;
            dumps.push(PageDump {
                peer_id: self_id.clone(),
                page_id: id.clone(),
                page,
                keyword_occurrences,
            });
        }
        Ok(dumps)
    }

    /// Digest over every (page id, last indexed at) pair; equal on two
    /// replicas that agree on every page's clock.
    pub fn hash(&self) -> Result<String> {
        let mut entries: Vec<(PageId, String)> = self
            .pages
            .get_all()?
            .into_iter()
            .map(|p| {
                let ts = p
                    .last_indexed_at
                    .and_then(|t| t.format(&Rfc3339).ok())
                    .unwrap_or_default();
                (p.id, ts)
            })
            .collect();
        entries.sort();
        let mut hasher = Sha1::new();
        for (id, ts) in entries {
            hasher.update(id.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(ts.as_bytes());
            hasher.update(b"\n");
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            pages: self.pages.count()?,
            keywords: self.occurrences.keyword_count()?,
        })
    }
}

fn meta_of(self_id: &PeerId, page: &Page) -> Option<IndexMeta> {
    page.last_indexed_at.map(|t| IndexMeta {
        page_id: page.id.clone(),
        peer_id: self_id.clone(),
        last_indexed_at: t,
        content_hash: page.content_hash.clone(),
    })
}
