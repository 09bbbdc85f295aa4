use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use trm_autopost::catalog::CatalogFetcher;
use trm_autopost::channel::TelegramChannel;
use trm_autopost::{config, pipeline};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Scrape categories, format posts and publish the next slice, once"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let fetcher = CatalogFetcher::from_config(&cfg.scraper)?;
    let channel = TelegramChannel::from_config(&cfg.post)?;

    let summary = pipeline::run_all(&cfg, &fetcher, &channel).await;
    if summary.has_failures() {
        warn!(%summary, "run finished with failures");
    } else {
        info!(%summary, "run finished");
    }
    Ok(())
}
