use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use trm_autopost::catalog::CatalogFetcher;
use trm_autopost::{config, pipeline};

#[derive(Debug, Parser)]
#[command(author, version, about = "Scrape every configured category into a product batch")]
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
    match pipeline::run_scrape(&cfg, &fetcher).await {
        Ok(report) => info!(
            fetched = report.fetched,
            failed_categories = ?report.failed_categories,
            artifact = ?report.artifact,
            "scrape finished"
        ),
        Err(err) => error!(?err, "scrape failed"),
    }
    Ok(())
}
