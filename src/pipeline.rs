//! Stage runners shared by the binaries: scrape, format, publish.
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, instrument, warn};

use crate::artifact::{self, BatchRead};
use crate::catalog::CatalogFetcher;
use crate::channel::PostChannel;
use crate::config::Config;
use crate::formatter::{self, PostTemplate};
use crate::model::{BatchKind, ProductRecord};
use crate::publisher::{PublishOutcome, PublishSettings, Publisher};
use crate::selector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub fetched: usize,
    pub failed_categories: Vec<String>,
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    /// No product batch to format.
    NoInput,
    /// The newest product batch held no usable rows.
    Empty { source: PathBuf, rejected_rows: usize },
    Written {
        source: PathBuf,
        artifact: PathBuf,
        formatted: usize,
        rejected_rows: usize,
    },
}

impl FormatOutcome {
    pub fn formatted(&self) -> usize {
        match self {
            FormatOutcome::Written { formatted, .. } => *formatted,
            _ => 0,
        }
    }

    pub fn rejected_rows(&self) -> usize {
        match self {
            FormatOutcome::Empty { rejected_rows, .. }
            | FormatOutcome::Written { rejected_rows, .. } => *rejected_rows,
            FormatOutcome::NoInput => 0,
        }
    }
}

/// Counts for one full scrape → format → publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub failed_categories: usize,
    pub formatted: usize,
    pub rejected_rows: usize,
    pub sent: usize,
    pub failed_sends: usize,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed_categories > 0 || self.failed_sends > 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched={} failed_categories={} formatted={} rejected_rows={} sent={} failed_sends={}",
            self.fetched,
            self.failed_categories,
            self.formatted,
            self.rejected_rows,
            self.sent,
            self.failed_sends
        )
    }
}

/// Fetch every configured category and write one product batch.
#[instrument(skip_all)]
pub async fn run_scrape(cfg: &Config, fetcher: &CatalogFetcher) -> Result<ScrapeReport> {
    let categories: Vec<(String, String)> = cfg
        .scraper
        .categories
        .iter()
        .map(|(name, url)| (name.clone(), url.clone()))
        .collect();

    let mut report = ScrapeReport::default();
    let mut products: Vec<ProductRecord> = Vec::new();
    for result in fetcher.fetch_all(&categories, cfg.scraper.concurrency).await {
        match result.outcome {
            Ok(found) => products.extend(found),
            Err(_) => report.failed_categories.push(result.category),
        }
    }
    report.fetched = products.len();

    if products.is_empty() {
        warn!("no products found; selectors may need updating");
        return Ok(report);
    }

    let path = artifact::write_batch(
        Path::new(&cfg.paths.sync_dir),
        BatchKind::Products,
        &artifact::timestamp(),
        &products,
    )
    .context("failed to write product batch")?;
    info!(count = products.len(), path = %path.display(), "product batch written");
    report.artifact = Some(path);
    Ok(report)
}

/// Format the newest product batch into a new post batch.
#[instrument(skip_all)]
pub fn run_format(cfg: &Config) -> Result<FormatOutcome> {
    let sync_dir = Path::new(&cfg.paths.sync_dir);
    let Some(source) = selector::latest(sync_dir, &BatchKind::Products.pattern())
        .with_context(|| format!("failed to list {}", sync_dir.display()))?
    else {
        warn!(dir = %sync_dir.display(), "no product batch found");
        return Ok(FormatOutcome::NoInput);
    };
    info!(source = %source.display(), "using product batch");

    let BatchRead {
        records,
        rejected: rejected_rows,
    } = artifact::read_batch::<ProductRecord>(&source)?;
    if records.is_empty() {
        warn!(source = %source.display(), rejected_rows, "product batch is empty");
        return Ok(FormatOutcome::Empty {
            source,
            rejected_rows,
        });
    }

    let template = PostTemplate::new(cfg.post.promo_line.clone());
    let posts = formatter::format(&records, &template);
    let artifact = artifact::write_batch(
        Path::new(&cfg.paths.outbox_dir),
        BatchKind::Posts,
        &artifact::timestamp(),
        &posts,
    )
    .context("failed to write post batch")?;
    info!(count = posts.len(), path = %artifact.display(), "post batch written");

    Ok(FormatOutcome::Written {
        source,
        artifact,
        formatted: posts.len(),
        rejected_rows,
    })
}

/// True when the newest product batch has no post batch formatted after it.
pub fn format_pending(cfg: &Config) -> Result<bool> {
    let sync_dir = Path::new(&cfg.paths.sync_dir);
    let Some(products) = selector::latest(sync_dir, &BatchKind::Products.pattern())
        .with_context(|| format!("failed to list {}", sync_dir.display()))?
    else {
        return Ok(false);
    };
    let outbox_dir = Path::new(&cfg.paths.outbox_dir);
    let Some(posts) = selector::latest(outbox_dir, &BatchKind::Posts.pattern())
        .with_context(|| format!("failed to list {}", outbox_dir.display()))?
    else {
        return Ok(true);
    };
    Ok(modified(&products)? > modified(&posts)?)
}

fn modified(path: &Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {}", path.display()))
}

/// Publish the next slice of the newest post batch.
pub async fn run_publish(cfg: &Config, channel: &dyn PostChannel) -> Result<PublishOutcome> {
    let publisher = Publisher::new(channel, PublishSettings::from_config(cfg));
    Ok(publisher.run().await?)
}

/// Run all three stages once. Stage failures are logged and the next stage
/// still runs against whatever artifacts exist. Formatting is skipped when the
/// newest product batch already has a post batch, so repeated runs keep
/// draining the same posts instead of re-queuing them.
pub async fn run_all(
    cfg: &Config,
    fetcher: &CatalogFetcher,
    channel: &dyn PostChannel,
) -> RunSummary {
    let mut summary = RunSummary::default();

    let mut scraped = false;
    match run_scrape(cfg, fetcher).await {
        Ok(report) => {
            summary.fetched = report.fetched;
            summary.failed_categories = report.failed_categories.len();
            scraped = report.artifact.is_some();
        }
        Err(err) => warn!(?err, "scrape stage failed"),
    }

    let pending = scraped
        || format_pending(cfg).unwrap_or_else(|err| {
            warn!(?err, "could not compare batch ages; formatting anyway");
            true
        });
    if pending {
        match run_format(cfg) {
            Ok(outcome) => {
                summary.formatted = outcome.formatted();
                summary.rejected_rows += outcome.rejected_rows();
            }
            Err(err) => warn!(?err, "format stage failed"),
        }
    } else {
        info!("newest product batch already formatted");
    }

    match run_publish(cfg, channel).await {
        Ok(outcome) => {
            summary.sent = outcome.sent();
            summary.failed_sends = outcome.failed();
            if let PublishOutcome::Done(report) = &outcome {
                summary.rejected_rows += report.rejected_rows;
            }
        }
        Err(err) => warn!(?err, "publish stage failed"),
    }

    summary
}
