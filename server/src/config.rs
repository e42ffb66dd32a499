//! Node configuration from flags or `SHARDEX_*` environment variables.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use shardex_core::PeerId;
use shardex_replication::Peer;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "shardex-node", about = "Replicated shard index node")]
pub struct NodeConfig {
    /// Data directory (sled database and HTML content)
    #[arg(long, env = "SHARDEX_DATA", default_value = "./data")]
    pub data: PathBuf,
    /// Host to bind
    #[arg(long, env = "SHARDEX_HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// Port to bind
    #[arg(long, env = "SHARDEX_PORT", default_value_t = 8080)]
    pub port: u16,
    /// Peer id of this node; defaults to `{advertise_host}:{port}`
    #[arg(long, env = "SHARDEX_PEER_ID")]
    pub peer_id: Option<String>,
    /// Hostname peers use to reach this node
    #[arg(long, env = "SHARDEX_ADVERTISE_HOST", default_value = "127.0.0.1")]
    pub advertise_host: String,
    #[arg(long, env = "SHARDEX_SHARD_ID", default_value_t = 0)]
    pub shard_id: u16,
    /// Seed peers as `id@host:port` or `id@host:port/shard`
    #[arg(long = "seed", env = "SHARDEX_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<String>,
    /// Max concurrent outbound peer calls per fan-out
    #[arg(long, env = "SHARDEX_BROADCAST_CONCURRENCY", default_value_t = 10)]
    pub broadcast_concurrency: usize,
    #[arg(long, env = "SHARDEX_PEER_TIMEOUT_SECS", default_value_t = 5)]
    pub peer_timeout_secs: u64,
    #[arg(long, env = "SHARDEX_REPAIR_BATCH_SIZE", default_value_t = 100)]
    pub repair_batch_size: usize,
    /// Seconds between pending repair job drains
    #[arg(long, env = "SHARDEX_REPAIR_INTERVAL_SECS", default_value_t = 10)]
    pub repair_interval_secs: u64,
    /// Seconds between full-shard audits
    #[arg(long, env = "SHARDEX_AUDIT_INTERVAL_SECS", default_value_t = 1800)]
    pub audit_interval_secs: u64,
    #[arg(long, env = "SHARDEX_DISCOVERY_INTERVAL_SECS", default_value_t = 30)]
    pub discovery_interval_secs: u64,
    /// Add title and domain signals to search ranking
    #[arg(long, env = "SHARDEX_SIGNALS", default_value_t = false)]
    pub signals: bool,
    /// Keyword tokens kept per page
    #[arg(long, env = "SHARDEX_MAX_KEYWORDS", default_value_t = 1500)]
    pub max_keywords: usize,
}

impl NodeConfig {
    pub fn local_peer(&self) -> Peer {
        let id = self
            .peer_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.advertise_host, self.port));
        Peer {
            id: PeerId::new(id),
            hostname: self.advertise_host.clone(),
            port: self.port,
            shard_id: self.shard_id,
        }
    }

    pub fn seed_peers(&self) -> Result<Vec<Peer>> {
        self.seeds
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_seed(s, self.shard_id))
            .collect()
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

/// `id@host:port[/shard]`; seeds without a shard are assumed to share ours.
pub fn parse_seed(raw: &str, default_shard: u16) -> Result<Peer> {
    let raw = raw.trim();
    let (id, addr) = raw
        .split_once('@')
        .ok_or_else(|| anyhow!("seed {raw:?} is not id@host:port"))?;
    let (addr, shard_id) = match addr.split_once('/') {
        Some((addr, shard)) => (addr, shard.parse().with_context(|| format!("bad shard in seed {raw:?}"))?),
        None => (addr, default_shard),
    };
    let (hostname, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("seed {raw:?} has no port"))?;
    if id.is_empty() || hostname.is_empty() {
        bail!("seed {raw:?} is missing id or host");
    }
    let port = port.parse().with_context(|| format!("bad port in seed {raw:?}"))?;
    Ok(Peer { id: PeerId::new(id), hostname: hostname.to_string(), port, shard_id })
}
