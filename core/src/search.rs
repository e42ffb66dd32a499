//! Keyword search over the occurrence store.
//!
//! A query is split into every contiguous run of its words; each run is a
//! candidate keyword, so both single words and extracted phrases can match.
//! Pages are ranked by the total frequency of all matched keywords.

use crate::error::Result;
use crate::index::{Keyword, Occurrence, Page, PageId};
use crate::signals::{SignalBreakdown, Signals};
use crate::store::{OccurrenceStore, PageStore};
use crate::tokenizer::normalize_words;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub page_id: PageId,
    pub score: f64,
    pub page: Page,
    pub keyword_occurrences: BTreeMap<Keyword, Occurrence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals: Option<SignalBreakdown>,
}

pub struct SearchEngine {
    pages: Arc<dyn PageStore>,
    occurrences: Arc<dyn OccurrenceStore>,
    signals: Option<Signals>,
}

impl SearchEngine {
    pub fn new(pages: Arc<dyn PageStore>, occurrences: Arc<dyn OccurrenceStore>) -> Self {
        Self { pages, occurrences, signals: None }
    }

    /// Add title/domain signals on top of the hit-count ranking.
    pub fn with_signals(mut self, signals: Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Ranked results; an empty list when nothing matches.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let groups = keyword_groups(query);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        // page -> keyword -> occurrence
        let mut hits: HashMap<PageId, BTreeMap<Keyword, Occurrence>> = HashMap::new();
        for keyword in &groups {
            let occurrences = match self.occurrences.get_all(keyword) {
                Ok(list) => list,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            for occ in occurrences {
                hits.entry(occ.page_id.clone()).or_default().insert(keyword.clone(), occ);
            }
        }

        let mut page_cache: HashMap<PageId, Option<Page>> = HashMap::new();
        let terms = normalize_words(query);
        let mut results = Vec::with_capacity(hits.len());
        for (page_id, keyword_occurrences) in hits {
            let page = match page_cache.get(&page_id) {
                Some(cached) => cached.clone(),
                None => {
                    let fetched = match self.pages.get(&page_id) {
                        Ok(p) => Some(p),
                        Err(e) if e.is_not_found() => {
                            tracing::debug!(page_id = %page_id, "occurrence without page, skipping");
                            None
                        }
                        Err(e) => return Err(e),
                    };
                    page_cache.insert(page_id.clone(), fetched.clone());
                    fetched
                }
            };
            let Some(page) = page else { continue };

            let mut score: f64 = keyword_occurrences.values().map(|o| o.frequency as f64).sum();
            let signals = self.signals.as_ref().map(|s| s.evaluate(&page, &terms));
            if let Some(breakdown) = &signals {
                score += breakdown.values().sum::<f64>();
            }
            results.push(SearchResult { page_id, score, page, keyword_occurrences, signals });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.page_id.cmp(&b.page_id))
        });
        tracing::debug!(query, groups = groups.len(), results = results.len(), "search complete");
        Ok(results)
    }
}

/// Every contiguous word sequence of the normalized query, shortest first,
/// without duplicates.
pub fn keyword_groups(query: &str) -> Vec<Keyword> {
    let terms = normalize_words(query);
    let mut seen = HashSet::new();
    let mut groups = Vec::new();
    for len in 1..=terms.len() {
        for window in terms.windows(len) {
            let group = window.join(" ");
            if seen.insert(group.clone()) {
                groups.push(group);
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_cover_every_contiguous_run() {
        let groups = keyword_groups("  Search   ENGINE rust ");
        assert_eq!(
            groups,
            vec!["search", "engine", "rust", "search engine", "engine rust", "search engine rust"]
        );
    }

    #[test]
    fn blank_query_has_no_groups() {
        assert!(keyword_groups("   ").is_empty());
    }

    #[test]
    fn repeated_words_do_not_double_count() {
        assert_eq!(keyword_groups("go go"), vec!["go", "go go"]);
    }
}
