//! Operator entry point: trigger crawls and inspect pipeline state. The
//! core stays a library; this binary only parses arguments and prints.

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::RemedyConfig;
use crawler::{Crawler, HeuristicDetector};
use infra::{Backoff, JobQueue, ResultCache, Store};
use learning::LearningService;
use pipeline::OutcomeTask;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "remedy", about = "Autonomous code remediation pipeline", version)]
struct Cli {
    /// Path to a JSON config file; environment overrides apply on top.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the store, cache, and queue.
    #[arg(long, global = true, default_value = ".remedy")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory tree for issues.
    Crawl {
        /// Root of the tree to scan.
        root: PathBuf,
    },
    /// Show job queue statistics.
    QueueStats,
    /// Show result cache statistics.
    CacheStats,
    /// List medium-tier fixes awaiting approval.
    Pending,
    /// Show per-strategy expertise scores.
    Expertise,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    common::logging::init("info", cli.json_logs);

    let config = match &cli.config {
        Some(path) => RemedyConfig::load(path)?,
        None => RemedyConfig::from_env(),
    };

    std::fs::create_dir_all(&cli.data_dir)?;
    let store = Arc::new(Store::open(cli.data_dir.join("remedy.db"))?);

    match cli.command {
        Command::Crawl { root } => {
            let cache = Arc::new(ResultCache::open(cli.data_dir.join("cache")));
            let crawler = Crawler::new(
                Arc::new(HeuristicDetector::new()),
                cache,
                store,
                common::EventBus::default(),
                config.crawler.clone(),
            );

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping at next file boundary");
                    ctrl_c.cancel();
                }
            });

            let report = crawler.crawl(&root, &cancel).await?;
            println!(
                "scanned {} files ({} failed, {} cache hits), {} issues{}",
                report.files_scanned,
                report.files_failed.len(),
                report.cache_hits,
                report.issues.len(),
                if report.cancelled { " [cancelled]" } else { "" }
            );
            for issue in &report.issues {
                println!(
                    "  {}:{} [{}] {:?}",
                    issue.file_path.display(),
                    issue.location.start_line,
                    issue.category.domain(),
                    issue.severity
                );
            }
        }
        Command::QueueStats => {
            let queue: JobQueue<OutcomeTask> = JobQueue::open(
                cli.data_dir.join("queue"),
                config.queue.max_retries,
                Backoff::default(),
            );
            let stats = queue.stats();
            println!(
                "pending {}  in-flight {}  dead-letters {}  acked {}  retried {}  durable {}",
                stats.pending,
                stats.in_flight,
                stats.dead_letters,
                stats.acked,
                stats.retried,
                stats.durable
            );
        }
        Command::CacheStats => {
            let cache = ResultCache::open(cli.data_dir.join("cache"));
            let stats = cache.stats();
            println!(
                "hits {}  misses {}  inserts {}  invalidations {}  hit-rate {:.1}%",
                stats.hits,
                stats.misses,
                stats.inserts,
                stats.invalidations,
                stats.hit_rate() * 100.0
            );
        }
        Command::Pending => {
            let pending = store.pending_approval_fixes()?;
            if pending.is_empty() {
                println!("no fixes awaiting approval");
            }
            for fix in pending {
                println!(
                    "{}  issue {}  {}  confidence {:.2}",
                    fix.id,
                    fix.issue_id,
                    fix.strategy.as_str(),
                    fix.confidence
                );
            }
        }
        Command::Expertise => {
            let queue = Arc::new(JobQueue::open(
                cli.data_dir.join("queue"),
                config.queue.max_retries,
                Backoff::default(),
            ));
            let service = LearningService::new(store, queue, config.learning.clone())?;
            let stats = service.domain_stats();
            if stats.is_empty() {
                println!("no expertise recorded yet");
            }
            for s in stats {
                println!(
                    "{:<16} {:<22} weight {:.3}  samples {}",
                    s.key.strategy.as_str(),
                    s.key.domain,
                    s.weight,
                    s.sample_count
                );
            }
        }
    }
    Ok(())
}
