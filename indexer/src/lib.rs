//! Indexing pipeline: turns a crawled page into stored metadata and postings.

pub mod content;
pub mod extract;

use content::{ContentError, ContentStore};
use extract::Extractor;
use sha1::{Digest, Sha1};
use shardex_core::{make_occurrences, Page, PageId, ShardIndex};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// Upper bound on keyword tokens taken from one page.
pub const DEFAULT_MAX_KEYWORDS: usize = 1500;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("content for page {page_id} unavailable: {source}")]
    Content {
        page_id: PageId,
        #[source]
        source: ContentError,
    },
    #[error(transparent)]
    Store(#[from] shardex_core::Error),
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        match self {
            IndexError::Content { source: ContentError::Missing(_), .. } => true,
            IndexError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub struct IndexingPipeline {
    index: Arc<ShardIndex>,
    content: Arc<dyn ContentStore>,
    extractor: Arc<dyn Extractor>,
    max_keywords: usize,
}

impl IndexingPipeline {
    pub fn new(index: Arc<ShardIndex>, content: Arc<dyn ContentStore>, extractor: Arc<dyn Extractor>) -> Self {
        Self { index, content, extractor, max_keywords: DEFAULT_MAX_KEYWORDS }
    }

    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords;
        self
    }

    /// Re-index one page that the crawl side has already created.
    ///
    /// Only a missing page, missing content or a store failure is an error.
    /// Extraction failures are logged and the page is committed with whatever
    /// metadata could be extracted. The index-updated event goes out through
    /// the shard's publisher and is never awaited here.
    pub fn index(&self, page_id: &PageId) -> Result<Page, IndexError> {
        let mut page = self.index.page(page_id)?;

        let content = self
            .content
            .get(page_id)
            .map_err(|source| IndexError::Content { page_id: page_id.clone(), source })?;
        if content.is_empty() {
            return Err(IndexError::Content {
                page_id: page_id.clone(),
                source: ContentError::Missing(page_id.clone()),
            });
        }
        page.content_hash = content_hash(&content);

        let extraction = self.extractor.extract(&content);
        match extraction.language {
            Ok(language) => page.language = language,
            Err(e) => tracing::warn!(page_id = %page_id, error = %e, "language extraction failed"),
        }
        match extraction.title {
            Ok(title) => page.title = title,
            Err(e) => tracing::warn!(page_id = %page_id, error = %e, "title extraction failed"),
        }
        match extraction.description {
            Ok(description) => page.description = description,
            Err(e) => tracing::warn!(page_id = %page_id, error = %e, "description extraction failed"),
        }
        let mut keywords = extraction.keywords.unwrap_or_else(|e| {
            tracing::warn!(page_id = %page_id, error = %e, "keyword extraction failed");
            Vec::new()
        });
        if keywords.len() > self.max_keywords {
            tracing::warn!(page_id = %page_id, count = keywords.len(), "truncating keywords");
            keywords.truncate(self.max_keywords);
        }

        // proposal only; the shard moves it past anything written meanwhile
        page.last_indexed_at = Some(next_clock(page.last_indexed_at));
        let occurrences = make_occurrences(&page.id, &keywords);
        let page = self.index.update(&page, &occurrences)?;

        tracing::info!(page_id = %page_id, keywords = occurrences.len(), "page indexed");
        Ok(page)
    }
}

/// Wall clock, but never behind the previous stamp.
fn next_clock(previous: Option<OffsetDateTime>) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
