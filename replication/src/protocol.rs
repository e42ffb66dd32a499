//! Peer wire contract: JSON over HTTP.

use crate::peer::Peer;
use serde::{Deserialize, Serialize};
use shardex_core::{IndexMeta, PageDump, PageId};

/// Broadcast apply; body is an `IndexEvent`.
pub const ENDPOINT_EVENT: &str = "/event";
pub const ENDPOINT_GET_INDEX_METAS: &str = "/repair/get-index-metas";
pub const ENDPOINT_GET_ALL_INDEX_METAS: &str = "/repair/get-all-index-metas";
pub const ENDPOINT_GET_PAGE_DUMPS: &str = "/repair/get-page-dumps";
/// Peer exchange: caller sends its descriptor, receives the callee's peer list.
pub const ENDPOINT_PEER_EXCHANGE: &str = "/peers/exchange";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetIndexMetasRequest {
    pub page_ids: Vec<PageId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetIndexMetasResponse {
    #[serde(default)]
    pub metas: Vec<IndexMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPageDumpsRequest {
    pub page_ids: Vec<PageId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetPageDumpsResponse {
    #[serde(default)]
    pub page_dumps: Vec<PageDump>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerExchangeRequest {
    pub peer: Peer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerExchangeResponse {
    #[serde(default)]
    pub peers: Vec<Peer>,
}
