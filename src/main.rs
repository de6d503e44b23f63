mod collection;
mod decompose;
mod fetch;
mod settings;
mod sitemap;
mod walker;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collection::CollisionPolicy;
use crate::decompose::Decomposer;
use crate::fetch::HttpFetcher;
use crate::settings::{CrawlConfig, Overrides};
use crate::walker::{NodeStatus, WalkOptions, Walker};

#[derive(Parser)]
#[command(
    name = "sitemap_mapper",
    about = "Walk a site's sitemap tree from robots.txt and export each sitemap as a CSV of URL subdirectories"
)]
struct Cli {
    /// Site root, e.g. https://www.datacamp.com (or SITEMAP_BASE_URL)
    base_url: Option<String>,

    /// Prefix stripped before splitting URLs (default: "<BASE_URL>/")
    #[arg(short, long)]
    prefix: Option<String>,

    /// Directory for the CSV files (default: sitemaps)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Sitemaps fetched at once; 1 walks depth-first in document order
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Retries on 429, 5xx and timeouts
    #[arg(long)]
    retries: Option<u32>,

    /// Stop the whole traversal after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// What to do when two sitemaps share a file name
    #[arg(long, value_enum)]
    collision_policy: Option<CollisionPolicy>,

    /// Write a JSON traversal report here
    #[arg(long)]
    report: Option<PathBuf>,
}

impl From<Cli> for Overrides {
    fn from(cli: Cli) -> Self {
        Self {
            base_url: cli.base_url,
            prefix: cli.prefix,
            output_dir: cli.output_dir,
            timeout_secs: cli.timeout_secs,
            user_agent: cli.user_agent,
            concurrency: cli.concurrency,
            retries: cli.retries,
            deadline_secs: cli.deadline_secs,
            collision_policy: cli.collision_policy,
            report: cli.report,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cfg = CrawlConfig::load(Cli::parse().into())?;
    info!(base_url = %cfg.base_url, prefix = %cfg.prefix(), "Starting sitemap walk");

    let fetcher = HttpFetcher::new(&cfg.user_agent, cfg.timeout(), cfg.retries)?;
    let walker = Walker::new(
        fetcher,
        Decomposer::new(cfg.prefix()),
        WalkOptions {
            concurrency: cfg.concurrency,
            deadline: cfg.deadline(),
            collision_policy: cfg.collision_policy,
        },
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, keeping sitemaps collected so far");
            on_ctrl_c.cancel();
        }
    });

    let traversal = walker.walk(&cfg.base_url, cancel).await;
    let report = &traversal.report;

    if let Some(path) = &cfg.report {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report {:?}", path))?;
    }

    if report.roots.is_empty() && !report.cancelled {
        println!("No sitemaps declared in {}/robots.txt", cfg.base_url.trim_end_matches('/'));
    }
    if traversal.collection.is_empty() {
        println!("Nothing to export.");
        return Ok(());
    }
    debug!(
        "Tables: {}",
        traversal.collection.identifiers().collect::<Vec<_>>().join(", ")
    );

    let summary = traversal.collection.export(&cfg.output_dir)?;

    println!(
        "Visited {} sitemaps: {} ok, {} empty, {} fetch errors, {} parse errors",
        report.nodes.len(),
        report.count(|s| *s == NodeStatus::Ok),
        report.count(|s| *s == NodeStatus::Empty),
        report.count(|s| matches!(s, NodeStatus::TransportError(_))),
        report.count(|s| matches!(s, NodeStatus::ParseError(_))),
    );
    if !report.issues.is_empty() {
        println!("{} traversal issues (cycles, duplicates, collisions)", report.issues.len());
    }
    if report.cancelled {
        println!("Stopped early; {} sitemaps not visited", report.abandoned.len());
    }
    println!(
        "Exported {} sitemaps to {}",
        summary.written.len(),
        cfg.output_dir.display()
    );

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    if !summary.failed.is_empty() {
        anyhow::bail!("{} tables failed to export", summary.failed.len());
    }
    let collisions = report.collisions().count();
    if cfg.collision_policy == CollisionPolicy::Reject && collisions > 0 {
        anyhow::bail!("{} sitemap identifier collisions", collisions);
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
