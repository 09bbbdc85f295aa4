use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use trm_autopost::pipeline::{self, FormatOutcome};
use trm_autopost::config;

#[derive(Debug, Parser)]
#[command(author, version, about = "Format the newest product batch into a post batch")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    match pipeline::run_format(&cfg) {
        Ok(FormatOutcome::Written {
            artifact,
            formatted,
            ..
        }) => info!(formatted, artifact = %artifact.display(), "posts prepared"),
        Ok(other) => info!(?other, "nothing formatted"),
        Err(err) => error!(?err, "formatting failed"),
    }
    Ok(())
}
