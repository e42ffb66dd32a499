//! Optional ranking boosts evaluated per result after keyword scoring.

use crate::index::Page;
use std::collections::BTreeMap;
use url::Url;

pub type SignalBreakdown = BTreeMap<String, f64>;

pub const LEVEL_NONE: f64 = 0.0;
pub const LEVEL_MEDIUM: f64 = 20.0;
pub const LEVEL_HIGH: f64 = 30.0;
pub const LEVEL_VERY_HIGH: f64 = 40.0;
pub const LEVEL_MAX: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct Signals {
    pub title: bool,
    pub domain: bool,
}

impl Default for Signals {
    fn default() -> Self {
        Self { title: true, domain: true }
    }
}

impl Signals {
    /// `terms` are the normalized query words.
    pub fn evaluate(&self, page: &Page, terms: &[String]) -> SignalBreakdown {
        let mut out = SignalBreakdown::new();
        if self.title {
            out.insert("title".into(), title_level(&page.title, terms));
        }
        if self.domain {
            out.insert("domain".into(), domain_level(&page.url, terms));
        }
        out
    }
}

fn title_level(title: &str, terms: &[String]) -> f64 {
    let words = crate::tokenizer::normalize_words(title);
    if words.is_empty() || terms.is_empty() {
        return LEVEL_NONE;
    }
    let mut level = LEVEL_NONE;
    for term in terms {
        level += words.iter().filter(|w| *w == term).count() as f64 * LEVEL_MEDIUM;
    }
    if words == terms {
        level += LEVEL_HIGH;
    }
    level
}

fn domain_level(raw_url: &str, terms: &[String]) -> f64 {
    let Ok(url) = Url::parse(raw_url) else {
        return LEVEL_NONE;
    };
    let Some(host) = url.host_str() else {
        return LEVEL_NONE;
    };
    let host = host.to_lowercase();
    let is_root = matches!(url.path(), "" | "/");

    if is_root && terms.iter().any(|t| *t == host) {
        return LEVEL_MAX;
    }
    let first_label = host.split('.').next().unwrap_or_default();
    if is_root && terms.iter().any(|t| t == first_label) {
        return LEVEL_VERY_HIGH;
    }
    match terms.iter().find(|t| host.contains(t.as_str())) {
        Some(t) if t.len() > 5 => LEVEL_HIGH,
        Some(_) => LEVEL_MEDIUM,
        None => LEVEL_NONE,
    }
}
