use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use url::Url;

/// Normalized token or token n-gram, e.g. `"search"` or `"search engine"`.
pub type Keyword = String;

/// Keyword → the single occurrence record one page holds under it.
pub type KeywordOccurrences = BTreeMap<Keyword, Occurrence>;

/// Content-addressed page identifier, identical on every peer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id from a URL: fragment dropped, then SHA-1 hex of the canonical form.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::Validation(format!("invalid url {raw:?}: {e}")))?;
        Ok(Self::from_canonical(&canonical_url(&url)))
    }

    fn from_canonical(canonical: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(canonical.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

pub fn canonical_url(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A crawled page and the metadata extracted for it. `last_indexed_at` is the
/// logical clock used to resolve conflicts between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_indexed_at: Option<OffsetDateTime>,
}

impl Page {
    pub fn new(id: PageId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: String::new(),
            description: String::new(),
            language: String::new(),
            content_hash: String::new(),
            last_indexed_at: None,
        }
    }
}

/// Posting: where and how often a keyword appears on one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub page_id: PageId,
    pub frequency: u32,
    pub positions: Vec<u32>,
}

/// Fold a keyword stream into one occurrence per distinct keyword, with
/// positions taken from the index in the stream.
pub fn make_occurrences(page_id: &PageId, keywords: &[Keyword]) -> KeywordOccurrences {
    let mut out = KeywordOccurrences::new();
    for (pos, keyword) in keywords.iter().enumerate() {
        if keyword.is_empty() {
            continue;
        }
        let occ = out.entry(keyword.clone()).or_insert_with(|| Occurrence {
            page_id: page_id.clone(),
            frequency: 0,
            positions: Vec::new(),
        });
        occ.frequency += 1;
        occ.positions.push(pos as u32);
    }
    out
}

/// Unit of the metadata-gossip phase of repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub page_id: PageId,
    pub peer_id: PeerId,
    #[serde(with = "time::serde::rfc3339")]
    pub last_indexed_at: OffsetDateTime,
    /// Hash of the content the replica indexed; tells equal-clock replicas apart.
    #[serde(default)]
    pub content_hash: String,
}

/// Unit of the data-transfer phase of repair: a page plus its full occurrence set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDump {
    pub peer_id: PeerId,
    pub page_id: PageId,
    pub page: Page,
    pub keyword_occurrences: KeywordOccurrences,
}

/// Pushed to peers right after a local re-index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEvent {
    pub page: Page,
    #[serde(default)]
    pub occurrences: KeywordOccurrences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairJobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl fmt::Display for RepairJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepairJobStatus::Pending => "pending",
            RepairJobStatus::Running => "running",
            RepairJobStatus::Complete => "complete",
            RepairJobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairJob {
    pub page_id: PageId,
    pub status: RepairJobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub status_last_updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl RepairJob {
    pub fn pending(page_id: PageId) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            page_id,
            status: RepairJobStatus::Pending,
            status_last_updated_at: now,
            created_at: now,
        }
    }

    pub fn transition(&mut self, status: RepairJobStatus) {
        self.status = status;
        self.status_last_updated_at = OffsetDateTime::now_utc();
    }
}
