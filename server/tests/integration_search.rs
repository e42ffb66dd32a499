use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use shardex_core::store::{MemOccurrenceStore, MemPageStore, MemRepairJobStore};
use shardex_core::{make_occurrences, NoopPublisher, Page, PageId, PeerId, ShardIndex};
use shardex_core::search::SearchEngine;
use shardex_indexer::content::{ContentStore, MemContentStore};
use shardex_indexer::extract::{Extraction, Extractor, HtmlExtractor};
use shardex_indexer::IndexingPipeline;
use shardex_replication::{HttpTransport, Peer, PeerDirectory, RepairCoordinator};
use shardex_server::{build_app, AppState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tower::ServiceExt;

struct TestNode {
    app: Router,
    index: Arc<ShardIndex>,
    content: Arc<MemContentStore>,
    directory: Arc<PeerDirectory>,
}

fn test_node() -> TestNode {
    test_node_with(Arc::new(HtmlExtractor::new()))
}

fn test_node_with(extractor: Arc<dyn Extractor>) -> TestNode {
    let pages = Arc::new(MemPageStore::new());
    let occurrences = Arc::new(MemOccurrenceStore::new());
    let index = Arc::new(ShardIndex::new(pages.clone(), occurrences.clone(), Arc::new(NoopPublisher)));
    let content = Arc::new(MemContentStore::new());
    let directory = Arc::new(PeerDirectory::new(Peer {
        id: PeerId::new("self"),
        hostname: "localhost".into(),
        port: 8080,
        shard_id: 1,
    }));
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(1)).unwrap());
    let repair = Arc::new(RepairCoordinator::new(
        index.clone(),
        directory.clone(),
        transport,
        Arc::new(MemRepairJobStore::new()),
    ));
    let pipeline = IndexingPipeline::new(index.clone(), content.clone(), extractor);
    let app = build_app(AppState {
        index: index.clone(),
        search: Arc::new(SearchEngine::new(pages, occurrences)),
        pipeline: Arc::new(pipeline),
        repair,
        directory: directory.clone(),
    });
    TestNode { app, index, content, directory }
}

fn crawl(node: &TestNode, id: &str, html: &str) {
    let id = PageId::new(id);
    node.index.create_page(&Page::new(id.clone(), format!("https://example.com/{id}"))).unwrap();
    node.content.put(&id, html.as_bytes()).unwrap();
}

fn page_at(id: &str, secs: i64) -> Page {
    let mut page = Page::new(PageId::new(id), format!("https://example.com/{id}"));
    page.last_indexed_at = Some(OffsetDateTime::from_unix_timestamp(secs).unwrap());
    page
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

#[tokio::test]
async fn health_is_ok() {
    let node = test_node();
    let resp = node.app.clone().oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

/// Extraction that holds its thread for a while.
struct SlowExtractor;

impl Extractor for SlowExtractor {
    fn extract(&self, content: &[u8]) -> Extraction {
        std::thread::sleep(Duration::from_millis(400));
        HtmlExtractor::new().extract(content)
    }
}

#[tokio::test(flavor = "current_thread")]
async fn slow_indexing_does_not_stall_other_requests() {
    let node = test_node_with(Arc::new(SlowExtractor));
    crawl(&node, "p1", "<html><body>slow page</body></html>");

    let start = Instant::now();
    let app = node.app.clone();
    let indexing = tokio::spawn(async move { post(&app, "/index", json!({ "page_id": "p1" })).await });
    tokio::task::yield_now().await;

    let (status, _) = get(&node.app, "/search?q=anything").await;
    assert_eq!(status, StatusCode::OK);
    assert!(start.elapsed() < Duration::from_millis(300), "search waited on indexing");

    let (status, _) = indexing.await.unwrap();
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn indexed_pages_are_searchable_in_rank_order() {
    let node = test_node();
    crawl(&node, "p1", "<html><head><title>Rust</title></head><body>rust rust rust engine</body></html>");
    crawl(&node, "p2", "<html><head><title>Notes</title></head><body>rust once</body></html>");
    for id in ["p1", "p2"] {
        let (status, page) = post(&node.app, "/index", json!({ "page_id": id })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(page["last_indexed_at"].is_string());
    }

    let (status, json) = get(&node.app, "/search?q=rust").await;
    assert_eq!(status, StatusCode::OK);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["page_id"], "p1");
    assert_eq!(results[1]["page_id"], "p2");
    assert_eq!(results[0]["keyword_occurrences"]["rust"]["frequency"], 4);
    assert_eq!(json["total_hits"], 2);

    let (_, json) = get(&node.app, "/search?q=rust&k=1").await;
    assert_eq!(json["results"].as_array().unwrap().len(), 1);
    assert_eq!(json["total_hits"], 2);
}

#[tokio::test]
async fn no_match_is_an_empty_list() {
    let node = test_node();
    let (status, json) = get(&node.app, "/search?q=nothing+here").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"], json!([]));
}

#[tokio::test]
async fn unknown_page_is_404_with_error_body() {
    let node = test_node();
    let (status, json) = get(&node.app, "/pages/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("missing"));

    let (status, _) = post(&node.app, "/index", json!({ "page_id": "missing" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_body_is_400() {
    let node = test_node();
    let req = Request::post("/repair/get-index-metas")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&node.app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn replicated_event_applies_only_newer_state() {
    let node = test_node();
    let page = page_at("p1", 10);
    let occ = make_occurrences(&page.id, &["fresh".to_string()]);
    let (status, json) = post(&node.app, "/event", json!({ "page": page, "occurrences": occ })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["applied"], true);

    let old = page_at("p1", 5);
    let occ = make_occurrences(&old.id, &["stale".to_string()]);
    let (_, json) = post(&node.app, "/event", json!({ "page": old, "occurrences": occ })).await;
    assert_eq!(json["applied"], false);

    let (_, json) = get(&node.app, "/search?q=fresh").await;
    assert_eq!(json["results"][0]["page_id"], "p1");
    let (_, json) = get(&node.app, "/search?q=stale").await;
    assert_eq!(json["results"], json!([]));
}

#[tokio::test]
async fn repair_endpoints_serve_local_state() {
    let node = test_node();
    let page = page_at("p1", 10);
    node.index.update(&page, &make_occurrences(&page.id, &["example".to_string()])).unwrap();

    let (status, json) = post(&node.app, "/repair/get-index-metas", json!({ "page_ids": ["p1", "nope"] })).await;
    assert_eq!(status, StatusCode::OK);
    let metas = json["metas"].as_array().unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0]["peer_id"], "self");
    assert_eq!(metas[0]["last_indexed_at"], "1970-01-01T00:00:10Z");

    let (_, json) = get(&node.app, "/repair/get-all-index-metas").await;
    assert_eq!(json["metas"].as_array().unwrap().len(), 1);

    let (_, json) = post(&node.app, "/repair/get-page-dumps", json!({ "page_ids": ["p1"] })).await;
    let dump = &json["page_dumps"][0];
    assert_eq!(dump["page_id"], "p1");
    assert_eq!(dump["keyword_occurrences"]["example"]["frequency"], 1);
}

#[tokio::test]
async fn repair_jobs_can_be_queued_and_queried() {
    let node = test_node();
    let (status, json) = post(&node.app, "/repair/jobs", json!({ "page_ids": ["p1"] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["jobs"][0]["status"], "pending");

    let (status, json) = get(&node.app, "/repair/jobs/p1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["page_id"], "p1");

    let (status, _) = get(&node.app, "/repair/jobs/other").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(&node.app, "/repair/jobs", json!({ "page_ids": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn peer_exchange_registers_caller() {
    let node = test_node();
    node.directory.add_peer(Peer { id: PeerId::new("a"), hostname: "a.local".into(), port: 1, shard_id: 1 });
    let caller = json!({ "peer": { "id": "b", "hostname": "b.local", "port": 2, "shard_id": 1 } });

    let (status, json) = post(&node.app, "/peers/exchange", caller).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = json["peers"].as_array().unwrap().iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["a"]);
    assert!(node.directory.get(&PeerId::new("b")).is_some());
}

#[tokio::test]
async fn hash_stats_and_delete() {
    let node = test_node();
    let page = page_at("p1", 10);
    node.index.update(&page, &make_occurrences(&page.id, &["example".to_string()])).unwrap();

    let (_, before) = get(&node.app, "/hash").await;
    let (_, stats) = get(&node.app, "/stats").await;
    assert_eq!(stats["pages"], 1);
    assert_eq!(stats["keywords"], 1);

    let req = Request::delete("/pages/p1").body(Body::empty()).unwrap();
    let resp = node.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (_, after) = get(&node.app, "/hash").await;
    assert_ne!(before["hash"], after["hash"]);
    let (_, stats) = get(&node.app, "/stats").await;
    assert_eq!(stats["pages"], 0);
    assert_eq!(stats["keywords"], 0);
}
