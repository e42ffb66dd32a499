//! Node-local index of one shard: data model, stores, write paths and search.

pub mod error;
pub mod index;
pub mod persist;
pub mod search;
pub mod shard;
pub mod signals;
pub mod store;
pub mod tokenizer;

pub use error::{Error, NotFound, Result};
pub use index::{
    make_occurrences, IndexEvent, IndexMeta, Keyword, KeywordOccurrences, Occurrence, Page,
    PageDump, PageId, PeerId, RepairJob, RepairJobStatus,
};
pub use shard::{Applied, IndexEventPublisher, NoopPublisher, ShardIndex};
