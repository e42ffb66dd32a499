//! Raw page content (HTML) as stored by the crawl side.

use parking_lot::RwLock;
use shardex_core::PageId;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no content stored for page {0}")]
    Missing(PageId),
    #[error("content io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait ContentStore: Send + Sync {
    fn get(&self, id: &PageId) -> Result<Vec<u8>, ContentError>;
    fn put(&self, id: &PageId, content: &[u8]) -> Result<(), ContentError>;
}

/// One file per page under a directory: `{root}/{page_id}.html`.
pub struct DiskContentStore {
    root: PathBuf,
}

impl DiskContentStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ContentError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self { root: root.as_ref().to_path_buf() })
    }

    fn path(&self, id: &PageId) -> PathBuf {
        self.root.join(format!("{}.html", id.as_str()))
    }
}

impl ContentStore for DiskContentStore {
    fn get(&self, id: &PageId) -> Result<Vec<u8>, ContentError> {
        match fs::read(self.path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ContentError::Missing(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: &PageId, content: &[u8]) -> Result<(), ContentError> {
        fs::write(self.path(id), content)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemContentStore {
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
}

impl MemContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemContentStore {
    fn get(&self, id: &PageId) -> Result<Vec<u8>, ContentError> {
        self.pages
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ContentError::Missing(id.clone()))
    }

    fn put(&self, id: &PageId, content: &[u8]) -> Result<(), ContentError> {
        self.pages.write().insert(id.clone(), content.to_vec());
        Ok(())
    }
}
