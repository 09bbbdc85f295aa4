use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use trm_autopost::channel::TelegramChannel;
use trm_autopost::{config, pipeline};

#[derive(Debug, Parser)]
#[command(author, version, about = "Publish the next slice of the newest post batch")]
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

    let channel = TelegramChannel::from_config(&cfg.post)?;
    match pipeline::run_publish(&cfg, &channel).await {
        Ok(outcome) => info!(
            phase = outcome.phase().as_str(),
            sent = outcome.sent(),
            failed = outcome.failed(),
            "publish finished"
        ),
        Err(err) => error!(?err, "publish failed"),
    }
    Ok(())
}
