//! Durable stores on top of a single sled database per node.

use crate::error::{Error, NotFound, Result};
use crate::index::{KeywordOccurrences, Occurrence, Page, PageId, RepairJob, RepairJobStatus};
use crate::store::{OccurrenceStore, PageStore, RepairJobStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Transactional, Tree};
use std::collections::{BTreeSet, HashMap};
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

const PAGES_TREE: &str = "pages";
const OCCURRENCES_TREE: &str = "occurrences";
const PAGE_KEYWORDS_TREE: &str = "page_keywords";
const REPAIR_JOBS_TREE: &str = "repair_jobs";

/// Layout of a node's data directory.
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn db(&self) -> PathBuf { self.root.join("node.sled") }
    pub fn content(&self) -> PathBuf { self.root.join("html") }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<Error>>;

fn abort<T>(r: Result<T>) -> TxResult<T> {
    r.map_err(ConflictableTransactionError::Abort)
}

fn unwrap_tx(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    }
}

/// Handle on the node database; hands out the individual stores.
#[derive(Clone)]
pub struct NodeDb {
    db: sled::Db,
}

impl NodeDb {
    pub fn open(paths: &DataPaths) -> Result<Self> {
        create_dir_all(&paths.root)?;
        let db = sled::open(paths.db())?;
        tracing::debug!(path = %paths.db().display(), "opened node database");
        Ok(Self { db })
    }

    pub fn pages(&self) -> Result<SledPageStore> {
        Ok(SledPageStore { tree: self.db.open_tree(PAGES_TREE)? })
    }

    pub fn occurrences(&self) -> Result<SledOccurrenceStore> {
        Ok(SledOccurrenceStore {
            occurrences: self.db.open_tree(OCCURRENCES_TREE)?,
            page_keywords: self.db.open_tree(PAGE_KEYWORDS_TREE)?,
        })
    }

    pub fn repair_jobs(&self) -> Result<SledRepairJobStore> {
        Ok(SledRepairJobStore { tree: self.db.open_tree(REPAIR_JOBS_TREE)? })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

pub struct SledPageStore {
    tree: Tree,
}

impl PageStore for SledPageStore {
    fn get(&self, id: &PageId) -> Result<Page> {
        match self.tree.get(id.as_str())? {
            Some(bytes) => decode(&bytes),
            None => Err(Error::page_not_found(id)),
        }
    }

    fn get_many(&self, ids: &[PageId]) -> Result<HashMap<PageId, Page>> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.tree.get(id.as_str())? {
                out.insert(id.clone(), decode(&bytes)?);
            }
        }
        Ok(out)
    }

    fn get_all(&self) -> Result<Vec<Page>> {
        self.tree
            .iter()
            .values()
            .map(|v| decode(&v?))
            .collect()
    }

    fn save(&self, page: &Page) -> Result<()> {
        self.tree.insert(page.id.as_str(), encode(page)?)?;
        Ok(())
    }

    fn delete(&self, id: &PageId) -> Result<()> {
        self.tree.remove(id.as_str())?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}

/// Keyword lists in one tree, the page → keywords reverse map in another;
/// both are updated in the same transaction.
pub struct SledOccurrenceStore {
    occurrences: Tree,
    page_keywords: Tree,
}

impl OccurrenceStore for SledOccurrenceStore {
    fn get_all(&self, keyword: &str) -> Result<Vec<Occurrence>> {
        match self.occurrences.get(keyword)? {
            Some(bytes) => decode(&bytes),
            None => Err(Error::NotFound(NotFound::Keyword(keyword.to_string()))),
        }
    }

    fn add(&self, keyword: &str, occurrence: Occurrence) -> Result<()> {
        (&self.occurrences, &self.page_keywords)
            .transaction(|(occ_tree, pk_tree)| {
                let mut list: Vec<Occurrence> = match occ_tree.get(keyword)? {
                    Some(bytes) => abort(decode(&bytes))?,
                    None => Vec::new(),
                };
                list.push(occurrence.clone());
                occ_tree.insert(keyword, abort(encode(&list))?)?;

                let page_key = occurrence.page_id.as_str();
                let mut keywords: BTreeSet<String> = match pk_tree.get(page_key)? {
                    Some(bytes) => abort(decode(&bytes))?,
                    None => BTreeSet::new(),
                };
                keywords.insert(keyword.to_string());
                pk_tree.insert(page_key, abort(encode(&keywords))?)?;
                Ok(())
            })
            .map_err(unwrap_tx)
    }

    fn remove_for_page(&self, page_id: &PageId) -> Result<()> {
        (&self.occurrences, &self.page_keywords)
            .transaction(|(occ_tree, pk_tree)| strip_page(occ_tree, pk_tree, page_id))
            .map_err(unwrap_tx)
    }

    fn replace_for_page(&self, page_id: &PageId, occurrences: &KeywordOccurrences) -> Result<()> {
        (&self.occurrences, &self.page_keywords)
            .transaction(|(occ_tree, pk_tree)| {
                strip_page(occ_tree, pk_tree, page_id)?;
                let mut keywords = BTreeSet::new();
                for (keyword, occ) in occurrences.iter().filter(|(_, o)| o.frequency > 0) {
                    let mut list: Vec<Occurrence> = match occ_tree.get(keyword.as_str())? {
                        Some(bytes) => abort(decode(&bytes))?,
                        None => Vec::new(),
                    };
                    list.push(occ.clone());
                    occ_tree.insert(keyword.as_str(), abort(encode(&list))?)?;
                    keywords.insert(keyword.clone());
                }
                if !keywords.is_empty() {
                    pk_tree.insert(page_id.as_str(), abort(encode(&keywords))?)?;
                }
                Ok(())
            })
            .map_err(unwrap_tx)
    }

    fn get_for_page(&self, page_id: &PageId) -> Result<KeywordOccurrences> {
        let mut out = KeywordOccurrences::new();
        let Some(bytes) = self.page_keywords.get(page_id.as_str())? else {
            return Ok(out);
        };
        let keywords: BTreeSet<String> = decode(&bytes)?;
        for keyword in keywords {
            let Some(bytes) = self.occurrences.get(keyword.as_str())? else {
                continue;
            };
            let list: Vec<Occurrence> = decode(&bytes)?;
            if let Some(occ) = list.into_iter().find(|o| &o.page_id == page_id) {
                out.insert(keyword, occ);
            }
        }
        Ok(out)
    }

    fn keyword_count(&self) -> Result<usize> {
        Ok(self.occurrences.len())
    }
}

/// Drop the page from every keyword it is listed under, inside a transaction.
fn strip_page(occ_tree: &TransactionalTree, pk_tree: &TransactionalTree, page_id: &PageId) -> TxResult<()> {
    let keywords: BTreeSet<String> = match pk_tree.remove(page_id.as_str())? {
        Some(bytes) => abort(decode(&bytes))?,
        None => return Ok(()),
    };
    for keyword in &keywords {
        let Some(bytes) = occ_tree.get(keyword.as_str())? else {
            continue;
        };
        let mut list: Vec<Occurrence> = abort(decode(&bytes))?;
        list.retain(|o| &o.page_id != page_id);
        if list.is_empty() {
            occ_tree.remove(keyword.as_str())?;
        } else {
            occ_tree.insert(keyword.as_str(), abort(encode(&list))?)?;
        }
    }
    Ok(())
}

pub struct SledRepairJobStore {
    tree: Tree,
}

impl RepairJobStore for SledRepairJobStore {
    fn get(&self, page_id: &PageId) -> Result<RepairJob> {
        match self.tree.get(page_id.as_str())? {
            Some(bytes) => decode(&bytes),
            None => Err(Error::NotFound(NotFound::RepairJob(page_id.clone()))),
        }
    }

    fn save(&self, job: &RepairJob) -> Result<()> {
        self.tree.insert(job.page_id.as_str(), encode(job)?)?;
        Ok(())
    }

    fn list_by_status(&self, status: RepairJobStatus) -> Result<Vec<RepairJob>> {
        let mut jobs = Vec::new();
        for value in self.tree.iter().values() {
            let job: RepairJob = decode(&value?)?;
            if job.status == status {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.page_id.cmp(&b.page_id)));
        Ok(jobs)
    }
}
