use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use shardex_core::persist::{DataPaths, NodeDb};
use shardex_core::store::PageStore;
use shardex_core::{NoopPublisher, Page, PageId, ShardIndex};
use shardex_indexer::content::{ContentStore, DiskContentStore};
use shardex_indexer::extract::HtmlExtractor;
use shardex_indexer::IndexingPipeline;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One crawled page. `html` is preferred; crawler text output (`title` + `body`) is wrapped.
#[derive(Debug, Deserialize)]
struct InputDoc {
    url: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load crawled pages into a node's data directory and index them", long_about = None)]
struct Cli {
    /// Node data directory
    #[arg(long, env = "SHARDEX_DATA", default_value = "./data", global = true)]
    data: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create pages from JSON/JSONL crawl records (file or directory) and index them
    Ingest {
        #[arg(long)]
        input: String,
    },
    /// Re-run indexing for one page, or every stored page
    Reindex {
        #[arg(long)]
        page_id: Option<String>,
    },
}

struct Local {
    db: NodeDb,
    index: Arc<ShardIndex>,
    content: Arc<DiskContentStore>,
    pipeline: IndexingPipeline,
}

fn open(data: &str) -> Result<Local> {
    let paths = DataPaths::new(data);
    let db = NodeDb::open(&paths)?;
    let index = Arc::new(ShardIndex::new(
        Arc::new(db.pages()?),
        Arc::new(db.occurrences()?),
        // offline tool: peers catch up through repair
        Arc::new(NoopPublisher),
    ));
    let content = Arc::new(DiskContentStore::open(paths.content())?);
    let pipeline = IndexingPipeline::new(index.clone(), content.clone(), Arc::new(HtmlExtractor::new()));
    Ok(Local { db, index, content, pipeline })
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let local = open(&cli.data)?;

    match cli.command {
        Commands::Ingest { input } => ingest(&local, Path::new(&input))?,
        Commands::Reindex { page_id } => reindex(&local, page_id)?,
    }
    local.db.flush()?;
    Ok(())
}

fn ingest(local: &Local, input: &Path) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }

    let mut indexed = 0usize;
    let mut failed = 0usize;
    for file in files {
        for doc in read_docs(&file)? {
            match ingest_doc(local, doc) {
                Ok(_) => indexed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(file = %file.display(), error = %e, "skipping record");
                }
            }
        }
    }
    tracing::info!(indexed, failed, "ingest complete");
    Ok(())
}

fn read_docs(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        let mut docs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            docs.push(serde_json::from_str(&line)?);
        }
        return Ok(docs);
    }
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    Ok(match json {
        serde_json::Value::Array(arr) => arr.into_iter().map(serde_json::from_value).collect::<Result<Vec<InputDoc>, _>>()?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    })
}

fn ingest_doc(local: &Local, doc: InputDoc) -> Result<PageId> {
    let id = PageId::from_url(&doc.url)?;
    let html = match doc.html {
        Some(html) => html,
        None => wrap_text(doc.title.as_deref().unwrap_or_default(), doc.body.as_deref().unwrap_or_default()),
    };
    local.content.put(&id, html.as_bytes())?;
    match local.index.page(&id) {
        Ok(_) => {}
        Err(e) if e.is_not_found() => local.index.create_page(&Page::new(id.clone(), doc.url.trim()))?,
        Err(e) => return Err(e.into()),
    }
    local.pipeline.index(&id)?;
    Ok(id)
}

fn reindex(local: &Local, page_id: Option<String>) -> Result<()> {
    let ids: Vec<PageId> = match page_id {
        Some(id) => vec![PageId::new(id)],
        None => local.index.page_store().get_all()?.into_iter().map(|p| p.id).collect(),
    };
    let mut failed = 0usize;
    for id in &ids {
        if let Err(e) = local.pipeline.index(id) {
            failed += 1;
            tracing::warn!(page_id = %id, error = %e, "reindex failed");
        }
    }
    tracing::info!(pages = ids.len(), failed, "reindex complete");
    Ok(())
}

fn wrap_text(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        escape(title),
        escape(body)
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
