//! Thin operator CLI wiring `IndexerCore`/`Watcher`/`CacheMaintenance`
//! together. Contains no indexing logic of its own.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser as ClapParser;
use clap::Subcommand;
use index_core::branch_synchronizer::BranchSynchronizer;
use index_core::cache::CacheMaintenance;
use index_core::cache::project_key;
use index_core::config::IndexConfig;
use index_core::discovery::FileDiscovery;
use index_core::error::IndexError;
use index_core::error::Result;
use index_core::go_source::GoParser;
use index_core::go_source::GoTagGraphExtractor;
use index_core::graph_updater::GraphUpdater;
use index_core::indexer_core::IndexerCore;
use index_core::processor::Processor;
use index_core::storage::BranchStore;
use index_core::traits::EmbedMode;
use index_core::traits::GitCliOps;
use index_core::traits::GitOps;
use index_core::traits::NoopInterfaceInferencer;
use index_core::traits::Provider;
use index_core::watcher::Watcher;
use tokio::sync::watch;

#[derive(ClapParser)]
#[command(name = "indexer", about = "incremental code index maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single indexing pass and exit.
    Index {
        #[arg(long)]
        root: PathBuf,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Use the built-in offline embedding stand-in instead of
        /// `embedding_endpoint` (no bundled network client ships with
        /// this crate).
        #[arg(long)]
        offline: bool,
    },
    /// Start the debounced filesystem watch loop.
    Watch {
        #[arg(long)]
        root: PathBuf,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        offline: bool,
    },
    /// Print per-branch cache metadata for the project at `root`.
    Status {
        #[arg(long)]
        root: PathBuf,
    },
    /// Force a cache eviction pass for the project at `root`.
    Evict {
        #[arg(long)]
        root: PathBuf,
    },
}

/// A local stand-in embedding provider: hash-derived vectors, no network
/// calls. Intended for smoke-testing the pipeline, not for production
/// search quality.
struct OfflineProvider {
    dims: usize,
}

#[async_trait]
impl Provider for OfflineProvider {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut hash: u64 = 0xcbf29ce484222325;
                for byte in t.as_bytes() {
                    hash ^= *byte as u64;
                    hash = hash.wrapping_mul(0x100000001b3);
                }
                (0..self.dims)
                    .map(|i| {
                        let mixed = hash.wrapping_add(i as u64).wrapping_mul(0x2545F4914F6CDD1D);
                        ((mixed % 2000) as f32 / 1000.0) - 1.0
                    })
                    .collect()
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn install_logging() {
    use tracing_subscriber::prelude::*;

    let file_appender = tracing_appender::rolling::daily("logs", "indexer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard); // lives for the process, flushed on drop at exit

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_provider(cfg: &IndexConfig, offline: bool) -> Result<Arc<dyn Provider>> {
    if offline || cfg.embedding_endpoint.is_none() {
        if !offline {
            tracing::warn!("no embedding_endpoint configured; falling back to the offline stand-in provider");
        }
        return Ok(Arc::new(OfflineProvider { dims: cfg.embedding_dims }));
    }
    Err(IndexError::ConfigFailure {
        cause: "no bundled network embedding provider ships with this crate; pass --offline or supply a Provider via the library API".to_string(),
    })
}

async fn build_core(cfg: &IndexConfig, branch: &str, offline: bool) -> Result<(Arc<IndexerCore>, Arc<CacheMaintenance>)> {
    std::fs::create_dir_all(&cfg.output_dir).map_err(|e| IndexError::io(&cfg.output_dir, e))?;

    let synchronizer = Arc::new(BranchSynchronizer::new(cfg.output_dir.clone(), Arc::new(GitCliOps) as Arc<dyn GitOps>));
    let db_path = synchronizer.branch_db_path(branch);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
    }
    let store = Arc::new(BranchStore::open(&db_path)?);

    let discovery = FileDiscovery::new(&cfg.code_patterns, &cfg.docs_patterns, &cfg.ignore_patterns)?;
    let provider = require_provider(cfg, offline)?;
    let processor = Processor::new(store.clone(), Arc::new(GoParser), provider, cfg.doc_chunk_size, cfg.overlap);
    let graph_updater = GraphUpdater::new(store.clone(), Arc::new(GoTagGraphExtractor::new()?), Arc::new(NoopInterfaceInferencer));

    let cache = Arc::new(CacheMaintenance::new(
        cfg.output_dir.clone(),
        project_key(&cfg.root_dir),
        cfg.eviction.clone(),
        "main".to_string(),
    ));

    let core = Arc::new(IndexerCore::new(
        cfg.root_dir.clone(),
        branch.to_string(),
        store,
        discovery,
        processor,
        graph_updater,
        Some(cache.clone()),
        Some(synchronizer),
    ));
    Ok((core, cache))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Index { root, branch, offline } => {
            let cfg = IndexConfig::load(&root)?;
            let (core, _cache) = build_core(&cfg, &branch, offline).await?;
            let cancel = watch::channel(false).1;
            let stats = core.index(None, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Watch { root, branch, offline } => {
            let cfg = IndexConfig::load(&root)?;
            let (core, _cache) = build_core(&cfg, &branch, offline).await?;
            let cancel = watch::channel(false).1;
            core.index(None, &cancel).await?;

            let discovery = Arc::new(FileDiscovery::new(&cfg.code_patterns, &cfg.docs_patterns, &cfg.ignore_patterns)?);
            let watcher = Watcher::new(cfg.root_dir.clone(), discovery, core);
            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                let _ = stop_tx.send(true);
            });
            watcher.run(stop_rx).await?;
        }
        Command::Status { root } => {
            let cfg = IndexConfig::load(&root)?;
            let cache = CacheMaintenance::new(cfg.output_dir.clone(), project_key(&cfg.root_dir), cfg.eviction.clone(), "main".to_string());
            let status = cache.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Evict { root } => {
            let cfg = IndexConfig::load(&root)?;
            let cache = CacheMaintenance::new(cfg.output_dir.clone(), project_key(&cfg.root_dir), cfg.eviction.clone(), "main".to_string());
            let report = cache.force_evict()?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "evicted": report.evicted,
                "freed_mb": report.freed_mb,
                "remaining_mb": report.remaining_mb,
            }))?);
        }
    }

    Ok(())
}
