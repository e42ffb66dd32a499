use anyhow::{Context, Result};
use clap::Parser;
use shardex_core::persist::{DataPaths, NodeDb};
use shardex_core::search::SearchEngine;
use shardex_core::signals::Signals;
use shardex_core::ShardIndex;
use shardex_indexer::content::DiskContentStore;
use shardex_indexer::extract::HtmlExtractor;
use shardex_indexer::IndexingPipeline;
use shardex_replication::{Broadcaster, HttpTransport, PeerDirectory, RepairCoordinator};
use shardex_server::config::NodeConfig;
use shardex_server::{build_app, AppState};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cfg = NodeConfig::parse();

    let paths = DataPaths::new(&cfg.data);
    let db = NodeDb::open(&paths).with_context(|| format!("opening data dir {}", cfg.data.display()))?;
    let content = DiskContentStore::open(paths.content())?;

    let local = cfg.local_peer();
    let directory = Arc::new(PeerDirectory::new(local.clone()));
    directory.merge(cfg.seed_peers()?);

    let transport = Arc::new(HttpTransport::new(cfg.peer_timeout())?);
    let broadcaster = Arc::new(
        Broadcaster::new(directory.clone(), transport.clone())
            .with_concurrency(cfg.broadcast_concurrency)
            .with_timeout(cfg.peer_timeout()),
    );

    let pages = Arc::new(db.pages()?);
    let occurrences = Arc::new(db.occurrences()?);
    let index = Arc::new(ShardIndex::new(pages.clone(), occurrences.clone(), broadcaster.clone()));

    let mut search = SearchEngine::new(pages, occurrences);
    if cfg.signals {
        search = search.with_signals(Signals::default());
    }
    let pipeline = IndexingPipeline::new(index.clone(), Arc::new(content), Arc::new(HtmlExtractor::new()))
        .with_max_keywords(cfg.max_keywords);
    let repair = Arc::new(
        RepairCoordinator::new(index.clone(), directory.clone(), transport, Arc::new(db.repair_jobs()?))
            .with_concurrency(cfg.broadcast_concurrency)
            .with_timeout(cfg.peer_timeout())
            .with_batch_size(cfg.repair_batch_size),
    );
    repair.recover_interrupted()?;

    every(Duration::from_secs(cfg.discovery_interval_secs), {
        let broadcaster = broadcaster.clone();
        move || {
            let broadcaster = broadcaster.clone();
            async move {
                broadcaster.discover_peers().await;
            }
        }
    });
    every(Duration::from_secs(cfg.repair_interval_secs), {
        let repair = repair.clone();
        move || {
            let repair = repair.clone();
            async move {
                if let Err(e) = repair.run_pending().await {
                    tracing::error!(error = %e, "draining repair jobs failed");
                }
            }
        }
    });
    every(Duration::from_secs(cfg.audit_interval_secs), {
        let repair = repair.clone();
        move || {
            let repair = repair.clone();
            async move {
                if let Err(e) = repair.audit().await {
                    tracing::error!(error = %e, "audit failed");
                }
            }
        }
    });

    let app = build_app(AppState {
        index,
        search: Arc::new(search),
        pipeline: Arc::new(pipeline),
        repair,
        directory,
    });

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, peer = %local, shard = local.shard_id, "node listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    db.flush()?;
    Ok(())
}

/// Run `task` on a fixed period; a zero period disables it.
fn every<F, Fut>(period: Duration, mut task: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            task().await;
        }
    });
}
