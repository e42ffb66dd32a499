//! HTTP surface of a node: the query boundary plus the peer wire contract.

pub mod config;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use shardex_core::search::{SearchEngine, SearchResult};
use shardex_core::{Applied, IndexEvent, Page, PageId, RepairJob, ShardIndex};
use shardex_indexer::{IndexError, IndexingPipeline};
use shardex_replication::protocol::*;
use shardex_replication::{PeerDirectory, RepairCoordinator};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<ShardIndex>,
    pub search: Arc<SearchEngine>,
    pub pipeline: Arc<IndexingPipeline>,
    pub repair: Arc<RepairCoordinator>,
    pub directory: Arc<PeerDirectory>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/index", post(index_handler))
        .route("/pages/:page_id", get(page_handler).delete(delete_page_handler))
        .route("/hash", get(hash_handler))
        .route("/stats", get(stats_handler))
        .route(ENDPOINT_EVENT, post(event_handler))
        .route(ENDPOINT_GET_INDEX_METAS, post(index_metas_handler))
        .route(ENDPOINT_GET_ALL_INDEX_METAS, get(all_index_metas_handler))
        .route(ENDPOINT_GET_PAGE_DUMPS, post(page_dumps_handler))
        .route("/repair/jobs", post(enqueue_handler))
        .route("/repair/jobs/:page_id", get(job_handler))
        .route(ENDPOINT_PEER_EXCHANGE, post(peer_exchange_handler))
        .route("/peers", get(peers_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// CORS_ALLOW_ORIGIN (comma-separated) or any origin.
fn cors_layer() -> CorsLayer {
    let any = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let Ok(val) = std::env::var("CORS_ALLOW_ORIGIN") else {
        return any;
    };
    let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
    if origins.is_empty() {
        any
    } else {
        CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
    }
}

// --- errors ---

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<shardex_core::Error> for ApiError {
    fn from(e: shardex_core::Error) -> Self {
        let status = match &e {
            shardex_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
            shardex_core::Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        if e.is_not_found() {
            return Self { status: StatusCode::NOT_FOUND, message: e.to_string() };
        }
        match e {
            IndexError::Store(inner) => inner.into(),
            other => Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: other.to_string() },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// `Json` extractor whose rejections use the `{"error": ...}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run store-bound work (sled reads, extraction) on the blocking pool.
async fn blocking<T, E, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("worker task failed: {e}"),
        }),
    }
}

// --- query boundary ---

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    /// Cap on returned results; all matches when absent.
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchResult>,
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    let start = std::time::Instant::now();
    let search = state.search.clone();
    let query = params.q.clone();
    let mut results = blocking(move || search.search(&query)).await?;
    let total_hits = results.len();
    if let Some(k) = params.k {
        results.truncate(k);
    }
    Ok(Json(SearchResponse {
        query: params.q,
        took_s: start.elapsed().as_secs_f64(),
        total_hits,
        results,
    }))
}

#[derive(Deserialize)]
pub struct IndexRequest {
    pub page_id: PageId,
}

async fn index_handler(State(state): State<AppState>, ApiJson(req): ApiJson<IndexRequest>) -> ApiResult<Page> {
    let pipeline = state.pipeline.clone();
    Ok(Json(blocking(move || pipeline.index(&req.page_id)).await?))
}

async fn page_handler(State(state): State<AppState>, Path(page_id): Path<String>) -> ApiResult<Page> {
    Ok(Json(state.index.page(&PageId::new(page_id))?))
}

async fn delete_page_handler(State(state): State<AppState>, Path(page_id): Path<String>) -> Result<StatusCode, ApiError> {
    let id = PageId::new(page_id);
    state.index.page(&id)?;
    state.index.delete_page(&id)?;
    tracing::info!(page_id = %id, "page deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn hash_handler(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({ "hash": state.index.hash()? })))
}

async fn stats_handler(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let stats = state.index.stats()?;
    Ok(Json(serde_json::json!({
        "pages": stats.pages,
        "keywords": stats.keywords,
        "peers": state.directory.len(),
    })))
}

// --- peer wire contract ---

async fn event_handler(State(state): State<AppState>, ApiJson(event): ApiJson<IndexEvent>) -> ApiResult<serde_json::Value> {
    let applied = state.index.apply_replicated(&event.page, &event.occurrences)?;
    tracing::debug!(page_id = %event.page.id, ?applied, "replicated event");
    Ok(Json(serde_json::json!({ "applied": applied == Applied::Written })))
}

async fn index_metas_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<GetIndexMetasRequest>,
) -> ApiResult<GetIndexMetasResponse> {
    Ok(Json(GetIndexMetasResponse { metas: state.repair.index_metas(&req.page_ids)? }))
}

async fn all_index_metas_handler(State(state): State<AppState>) -> ApiResult<GetIndexMetasResponse> {
    Ok(Json(GetIndexMetasResponse { metas: state.repair.all_index_metas()? }))
}

async fn page_dumps_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<GetPageDumpsRequest>,
) -> ApiResult<GetPageDumpsResponse> {
    Ok(Json(GetPageDumpsResponse { page_dumps: state.repair.page_dumps(&req.page_ids)? }))
}

#[derive(Deserialize)]
pub struct EnqueueRequest {
    pub page_ids: Vec<PageId>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    pub jobs: Vec<RepairJob>,
}

async fn enqueue_handler(State(state): State<AppState>, ApiJson(req): ApiJson<EnqueueRequest>) -> ApiResult<EnqueueResponse> {
    if req.page_ids.is_empty() {
        return Err(ApiError::bad_request("page_ids must not be empty"));
    }
    Ok(Json(EnqueueResponse { jobs: state.repair.enqueue(&req.page_ids)? }))
}

async fn job_handler(State(state): State<AppState>, Path(page_id): Path<String>) -> ApiResult<RepairJob> {
    Ok(Json(state.repair.job(&PageId::new(page_id))?))
}

async fn peer_exchange_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PeerExchangeRequest>,
) -> ApiResult<PeerExchangeResponse> {
    let caller = req.peer.id.clone();
    state.directory.add_peer(req.peer);
    let peers = state.directory.peers().into_iter().filter(|p| p.id != caller).collect();
    Ok(Json(PeerExchangeResponse { peers }))
}

async fn peers_handler(State(state): State<AppState>) -> Json<PeerExchangeResponse> {
    Json(PeerExchangeResponse { peers: state.directory.peers() })
}
