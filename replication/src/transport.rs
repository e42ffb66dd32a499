//! Outbound calls to peers.
//!
//! [`PeerTransport`] is the seam between the replication logic and the
//! network; [`HttpTransport`] speaks the JSON wire contract with reqwest.
//! Callers wrap every call in their own timeout as well.

use crate::peer::Peer;
use crate::protocol::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shardex_core::{IndexEvent, IndexMeta, PageDump, PageId};
use std::time::Duration;
use thiserror::Error;

/// Transient, retryable failure talking to one peer.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("peer answered {0}")]
    Status(u16),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("undecodable response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send_event(&self, peer: &Peer, event: &IndexEvent) -> Result<(), PeerError>;
    async fn get_index_metas(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<IndexMeta>, PeerError>;
    async fn get_all_index_metas(&self, peer: &Peer) -> Result<Vec<IndexMeta>, PeerError>;
    async fn get_page_dumps(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<PageDump>, PeerError>;
    /// Send `local` to `peer`, receive the peer's known peers.
    async fn exchange_peers(&self, peer: &Peer, local: &Peer) -> Result<Vec<Peer>, PeerError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    async fn post<B, R>(&self, peer: &Peer, endpoint: &str, body: &B) -> Result<R, PeerError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", peer.base_url(), endpoint);
        let resp = self.client.post(url).json(body).send().await.map_err(request_error)?;
        decode(resp).await
    }

    async fn get<R: DeserializeOwned>(&self, peer: &Peer, endpoint: &str) -> Result<R, PeerError> {
        let url = format!("{}{}", peer.base_url(), endpoint);
        let resp = self.client.get(url).send().await.map_err(request_error)?;
        decode(resp).await
    }
}

fn request_error(e: reqwest::Error) -> PeerError {
    if e.is_timeout() {
        PeerError::Timeout(Duration::ZERO)
    } else {
        PeerError::Request(e.to_string())
    }
}

async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, PeerError> {
    if !resp.status().is_success() {
        return Err(PeerError::Status(resp.status().as_u16()));
    }
    resp.json::<R>().await.map_err(|e| PeerError::Decode(e.to_string()))
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send_event(&self, peer: &Peer, event: &IndexEvent) -> Result<(), PeerError> {
        let url = format!("{}{}", peer.base_url(), ENDPOINT_EVENT);
        let resp = self.client.post(url).json(event).send().await.map_err(request_error)?;
        if !resp.status().is_success() {
            return Err(PeerError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn get_index_metas(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<IndexMeta>, PeerError> {
        let req = GetIndexMetasRequest { page_ids: page_ids.to_vec() };
        let resp: GetIndexMetasResponse = self.post(peer, ENDPOINT_GET_INDEX_METAS, &req).await?;
        Ok(resp.metas)
    }

    async fn get_all_index_metas(&self, peer: &Peer) -> Result<Vec<IndexMeta>, PeerError> {
        let resp: GetIndexMetasResponse = self.get(peer, ENDPOINT_GET_ALL_INDEX_METAS).await?;
        Ok(resp.metas)
    }

    async fn get_page_dumps(&self, peer: &Peer, page_ids: &[PageId]) -> Result<Vec<PageDump>, PeerError> {
        let req = GetPageDumpsRequest { page_ids: page_ids.to_vec() };
        let resp: GetPageDumpsResponse = self.post(peer, ENDPOINT_GET_PAGE_DUMPS, &req).await?;
        Ok(resp.page_dumps)
    }

    async fn exchange_peers(&self, peer: &Peer, local: &Peer) -> Result<Vec<Peer>, PeerError> {
        let req = PeerExchangeRequest { peer: local.clone() };
        let resp: PeerExchangeResponse = self.post(peer, ENDPOINT_PEER_EXCHANGE, &req).await?;
        Ok(resp.peers)
    }
}

/// Run one peer call under `limit`; a slow peer fails this call only.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, PeerError>
where
    F: std::future::Future<Output = Result<T, PeerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PeerError::Timeout(limit)),
    }
}
