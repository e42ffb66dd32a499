//! Store traits and their in-memory implementations.
//!
//! Every store provides its own mutual exclusion, so a single instance can be
//! shared (`Arc<dyn ...>`) between request handlers, the indexing pipeline and
//! repair. The sled-backed implementations live in [`crate::persist`].

use crate::error::{Error, NotFound, Result};
use crate::index::{Keyword, KeywordOccurrences, Occurrence, Page, PageId, RepairJob, RepairJobStatus};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

pub trait PageStore: Send + Sync {
    fn get(&self, id: &PageId) -> Result<Page>;
    /// Pages for the given ids; ids with no stored page are left out.
    fn get_many(&self, ids: &[PageId]) -> Result<HashMap<PageId, Page>>;
    fn get_all(&self) -> Result<Vec<Page>>;
    /// Insert or fully replace.
    fn save(&self, page: &Page) -> Result<()>;
    fn delete(&self, id: &PageId) -> Result<()>;
    fn count(&self) -> Result<usize>;
}

/// The inverted index: keyword → occurrences, at most one per page.
pub trait OccurrenceStore: Send + Sync {
    /// NotFound when the keyword was never seen (or has been emptied and removed).
    fn get_all(&self, keyword: &str) -> Result<Vec<Occurrence>>;
    /// Appends; callers replacing a page must `remove_for_page` first.
    fn add(&self, keyword: &str, occurrence: Occurrence) -> Result<()>;
    /// Strips the page from every keyword and drops keywords left empty.
    fn remove_for_page(&self, page_id: &PageId) -> Result<()>;
    /// Swap the page's whole occurrence set in one step. Zero-frequency
    /// entries are skipped. Readers see either the old set or the new one.
    fn replace_for_page(&self, page_id: &PageId, occurrences: &KeywordOccurrences) -> Result<()>;
    fn get_for_page(&self, page_id: &PageId) -> Result<KeywordOccurrences>;
    fn keyword_count(&self) -> Result<usize>;
}

pub trait RepairJobStore: Send + Sync {
    fn get(&self, page_id: &PageId) -> Result<RepairJob>;
    fn save(&self, job: &RepairJob) -> Result<()>;
    fn list_by_status(&self, status: RepairJobStatus) -> Result<Vec<RepairJob>>;
}

#[derive(Default)]
pub struct MemPageStore {
    pages: RwLock<HashMap<PageId, Page>>,
}

impl MemPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemPageStore {
    fn get(&self, id: &PageId) -> Result<Page> {
        self.pages
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::page_not_found(id))
    }

    fn get_many(&self, ids: &[PageId]) -> Result<HashMap<PageId, Page>> {
        let pages = self.pages.read();
        Ok(ids
            .iter()
            .filter_map(|id| pages.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    fn get_all(&self) -> Result<Vec<Page>> {
        Ok(self.pages.read().values().cloned().collect())
    }

    fn save(&self, page: &Page) -> Result<()> {
        self.pages.write().insert(page.id.clone(), page.clone());
        Ok(())
    }

    fn delete(&self, id: &PageId) -> Result<()> {
        self.pages.write().remove(id);
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.pages.read().len())
    }
}

#[derive(Default)]
struct Postings {
    by_keyword: HashMap<Keyword, Vec<Occurrence>>,
    // reverse map so page removal does not scan every keyword
    by_page: HashMap<PageId, BTreeSet<Keyword>>,
}

impl Postings {
    fn push(&mut self, keyword: &str, occurrence: Occurrence) {
        self.by_page
            .entry(occurrence.page_id.clone())
            .or_default()
            .insert(keyword.to_string());
        self.by_keyword.entry(keyword.to_string()).or_default().push(occurrence);
    }

    fn strip(&mut self, page_id: &PageId) {
        let Some(keywords) = self.by_page.remove(page_id) else {
            return;
        };
        for keyword in keywords {
            let emptied = match self.by_keyword.get_mut(&keyword) {
                Some(list) => {
                    list.retain(|o| &o.page_id != page_id);
                    list.is_empty()
                }
                None => false,
            };
            if emptied {
                self.by_keyword.remove(&keyword);
            }
        }
    }
}

#[derive(Default)]
pub struct MemOccurrenceStore {
    inner: RwLock<Postings>,
}

impl MemOccurrenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OccurrenceStore for MemOccurrenceStore {
    fn get_all(&self, keyword: &str) -> Result<Vec<Occurrence>> {
        self.inner
            .read()
            .by_keyword
            .get(keyword)
            .cloned()
            .ok_or_else(|| Error::NotFound(NotFound::Keyword(keyword.to_string())))
    }

    fn add(&self, keyword: &str, occurrence: Occurrence) -> Result<()> {
        self.inner.write().push(keyword, occurrence);
        Ok(())
    }

    fn remove_for_page(&self, page_id: &PageId) -> Result<()> {
        self.inner.write().strip(page_id);
        Ok(())
    }

    fn replace_for_page(&self, page_id: &PageId, occurrences: &KeywordOccurrences) -> Result<()> {
        let mut inner = self.inner.write();
        inner.strip(page_id);
        for (keyword, occ) in occurrences.iter().filter(|(_, o)| o.frequency > 0) {
            inner.push(keyword, occ.clone());
        }
        Ok(())
    }

    fn get_for_page(&self, page_id: &PageId) -> Result<KeywordOccurrences> {
        let inner = self.inner.read();
        let mut out = KeywordOccurrences::new();
        if let Some(keywords) = inner.by_page.get(page_id) {
            for keyword in keywords {
                let found = inner
                    .by_keyword
                    .get(keyword)
                    .and_then(|list| list.iter().find(|o| &o.page_id == page_id));
                if let Some(occ) = found {
                    out.insert(keyword.clone(), occ.clone());
                }
            }
        }
        Ok(out)
    }

    fn keyword_count(&self) -> Result<usize> {
        Ok(self.inner.read().by_keyword.len())
    }
}

#[derive(Default)]
pub struct MemRepairJobStore {
    jobs: RwLock<HashMap<PageId, RepairJob>>,
}

impl MemRepairJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RepairJobStore for MemRepairJobStore {
    fn get(&self, page_id: &PageId) -> Result<RepairJob> {
        self.jobs
            .read()
            .get(page_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(NotFound::RepairJob(page_id.clone())))
    }

    fn save(&self, job: &RepairJob) -> Result<()> {
        self.jobs.write().insert(job.page_id.clone(), job.clone());
        Ok(())
    }

    fn list_by_status(&self, status: RepairJobStatus) -> Result<Vec<RepairJob>> {
        let mut jobs: Vec<RepairJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.page_id.cmp(&b.page_id)));
        Ok(jobs)
    }
}
