use crate::index::{Keyword, PageId};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Page, keyword or job absent. Expected and non-fatal for most callers.
    #[error("{0} not found")]
    NotFound(NotFound),

    /// Local store failure; fatal to the current operation.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    Page(PageId),
    Keyword(Keyword),
    RepairJob(PageId),
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Page(id) => write!(f, "page {id}"),
            NotFound::Keyword(k) => write!(f, "keyword {k:?}"),
            NotFound::RepairJob(id) => write!(f, "repair job for page {id}"),
        }
    }
}

impl Error {
    pub fn page_not_found(id: &PageId) -> Self {
        Error::NotFound(NotFound::Page(id.clone()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
