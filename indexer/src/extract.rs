//! Extraction collaborators: language, title, description and keyword tokens.
//!
//! Each field is extracted independently so one failure does not cost the
//! others; the pipeline logs the errors and keeps whatever succeeded.

use scraper::{Html, Selector};
use shardex_core::tokenizer::tokenize;
use shardex_core::Keyword;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no {0} found")]
    Missing(&'static str),
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

pub struct Extraction {
    pub language: Result<String, ExtractError>,
    pub title: Result<String, ExtractError>,
    pub description: Result<String, ExtractError>,
    pub keywords: Result<Vec<Keyword>, ExtractError>,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, content: &[u8]) -> Extraction;
}

/// HTML extractor. Keywords are the non-stopword words of title, meta
/// description and visible body text, each followed by the bigram it forms
/// with the next word when the two are adjacent in the text.
pub struct HtmlExtractor {
    title: Selector,
    description: Selector,
    html: Selector,
    body: Selector,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        Self {
            title: Selector::parse("title").expect("valid selector"),
            description: Selector::parse(r#"meta[name="description"]"#).expect("valid selector"),
            html: Selector::parse("html").expect("valid selector"),
            body: Selector::parse("body").expect("valid selector"),
        }
    }

    fn title(&self, doc: &Html) -> Result<String, ExtractError> {
        let title = doc
            .select(&self.title)
            .next()
            .map(|n| n.text().collect::<String>())
            .ok_or(ExtractError::Missing("title"))?;
        let title = collapse_whitespace(&title);
        if title.is_empty() {
            return Err(ExtractError::Missing("title"));
        }
        Ok(title)
    }

    fn description(&self, doc: &Html) -> Result<String, ExtractError> {
        doc.select(&self.description)
            .next()
            .and_then(|n| n.value().attr("content"))
            .map(collapse_whitespace)
            .filter(|d| !d.is_empty())
            .ok_or(ExtractError::Missing("description"))
    }

    fn language(&self, doc: &Html) -> Result<String, ExtractError> {
        let lang = doc
            .select(&self.html)
            .next()
            .and_then(|n| n.value().attr("lang"))
            .ok_or(ExtractError::Missing("language"))?;
        let primary = lang.split(['-', '_']).next().unwrap_or_default().trim().to_lowercase();
        if primary.is_empty() || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ExtractError::Malformed { field: "language", reason: lang.to_string() });
        }
        Ok(primary)
    }

    fn body_text(&self, doc: &Html) -> String {
        let Some(body) = doc.select(&self.body).next() else {
            return String::new();
        };
        let mut out = String::new();
        for node in body.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element())
                .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
        out
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, content: &[u8]) -> Extraction {
        let source = String::from_utf8_lossy(content);
        let doc = Html::parse_document(&source);

        let title = self.title(&doc);
        let description = self.description(&doc);
        let language = self.language(&doc);

        // one stream per field, concatenated, so no bigram spans two fields
        let mut keywords = Vec::new();
        for part in [title.as_deref().ok(), description.as_deref().ok()].into_iter().flatten() {
            keywords.extend(keyword_stream(part));
        }
        keywords.extend(keyword_stream(&self.body_text(&doc)));

        Extraction { language, title, description, keywords: Ok(keywords) }
    }
}

/// Unigrams in text order, each followed by its bigram with the next word
/// when no stopword or punctuation sits between them.
pub fn keyword_stream(text: &str) -> Vec<Keyword> {
    let tokens = tokenize(text);
    let mut out = Vec::with_capacity(tokens.len() * 2);
    for (i, (word, pos)) in tokens.iter().enumerate() {
        out.push(word.clone());
        if let Some((next, next_pos)) = tokens.get(i + 1) {
            if *next_pos == pos + 1 {
                out.push(format!("{word} {next}"));
            }
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
