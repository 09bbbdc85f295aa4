//! Resumable batch publisher.
//!
//! One run walks `Idle → BatchSelected → RangeComputed → Sending →
//! Checkpointed → Done`, stopping early in `NoInput` (no post batch) or
//! `Exhausted` (checkpoint already covers the batch). The checkpoint is written
//! once per run, after the whole range has been attempted, and advances by the
//! number of confirmed sends.
//!
//! Under [`BatchPolicy::FinishCurrent`] the batch named in the checkpoint is
//! drained before a newer one is started from its first post.
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::artifact::{self, ArtifactError, BatchRead};
use crate::channel::PostChannel;
use crate::config::{BatchPolicy, Config};
use crate::model::{BatchKind, PostRecord};
use crate::selector;
use crate::state::{self, PublishState, StateError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to list post batches in {dir}: {source}")]
    Select {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Read(#[from] ArtifactError),
    #[error("failed to write checkpoint: {0}")]
    Checkpoint(#[from] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BatchSelected,
    RangeComputed,
    Sending,
    Checkpointed,
    Done,
    NoInput,
    Exhausted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::BatchSelected => "BATCH_SELECTED",
            Phase::RangeComputed => "RANGE_COMPUTED",
            Phase::Sending => "SENDING",
            Phase::Checkpointed => "CHECKPOINTED",
            Phase::Done => "DONE",
            Phase::NoInput => "NO_INPUT",
            Phase::Exhausted => "EXHAUSTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub outbox_dir: PathBuf,
    pub pattern: String,
    pub state_path: PathBuf,
    pub posts_per_run: usize,
    pub batch_policy: BatchPolicy,
}

impl PublishSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            outbox_dir: PathBuf::from(&cfg.paths.outbox_dir),
            pattern: BatchKind::Posts.pattern(),
            state_path: cfg.state_path(),
            posts_per_run: cfg.post.posts_per_run,
            batch_policy: cfg.post.batch_policy,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub batch: PathBuf,
    pub range: Range<usize>,
    pub sent: usize,
    /// Indices whose send failed. They are not re-queued.
    pub failed: Vec<usize>,
    pub last_index: i64,
    pub rejected_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    NoInput,
    Exhausted {
        batch: PathBuf,
        len: usize,
        last_index: i64,
    },
    Done(PublishReport),
}

impl PublishOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            PublishOutcome::NoInput => Phase::NoInput,
            PublishOutcome::Exhausted { .. } => Phase::Exhausted,
            PublishOutcome::Done(_) => Phase::Done,
        }
    }

    pub fn sent(&self) -> usize {
        match self {
            PublishOutcome::Done(report) => report.sent,
            _ => 0,
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            PublishOutcome::Done(report) => report.failed.len(),
            _ => 0,
        }
    }
}

/// `[last_index + 1, min(start + cap, len))`, or `None` once the batch is used up.
pub fn plan_range(state: &PublishState, len: usize, cap: usize) -> Option<Range<usize>> {
    let start = state.next_index();
    if start >= len {
        return None;
    }
    let end = start.saturating_add(cap).min(len);
    Some(start..end)
}

/// New checkpoint after `sent` confirmed sends starting at `start`.
pub fn checkpoint(start: usize, sent: usize) -> i64 {
    let start = i64::try_from(start).unwrap_or(i64::MAX);
    let sent = i64::try_from(sent).unwrap_or(i64::MAX);
    start.saturating_add(sent).saturating_sub(1)
}

pub struct Publisher<'a> {
    channel: &'a dyn PostChannel,
    settings: PublishSettings,
}

impl<'a> Publisher<'a> {
    pub fn new(channel: &'a dyn PostChannel, settings: PublishSettings) -> Self {
        Self { channel, settings }
    }

    #[instrument(skip_all, fields(dir = %self.settings.outbox_dir.display()))]
    pub async fn run(&self) -> Result<PublishOutcome, PublishError> {
        let mut state = state::load(&self.settings.state_path);
        let Some((batch_path, batch)) = self.select_batch(&mut state)? else {
            warn!(pattern = %self.settings.pattern, "no post batch found");
            return Ok(PublishOutcome::NoInput);
        };
        let BatchRead {
            records: posts,
            rejected: rejected_rows,
        } = batch;
        let batch_name = file_name(&batch_path);
        info!(
            phase = Phase::BatchSelected.as_str(),
            batch = %batch_path.display(),
            posts = posts.len(),
            rejected_rows,
            "using post batch"
        );

        let Some(range) = plan_range(&state, posts.len(), self.settings.posts_per_run) else {
            if posts.is_empty() {
                warn!(batch = %batch_name, "post batch is empty");
            } else {
                info!(
                    batch = %batch_name,
                    last_index = state.last_index,
                    "all posts already sent; waiting for a newer batch"
                );
            }
            return Ok(PublishOutcome::Exhausted {
                batch: batch_path,
                len: posts.len(),
                last_index: state.last_index,
            });
        };
        info!(
            phase = Phase::RangeComputed.as_str(),
            start = range.start,
            end = range.end - 1,
            "sending post range"
        );

        let (sent, failed) = self.send_range(&posts, range.clone()).await;

        state.last_index = checkpoint(range.start, sent);
        state.batch = Some(batch_name);
        state::save(&self.settings.state_path, &state)?;
        if !failed.is_empty() {
            warn!(
                ?failed,
                last_index = state.last_index,
                "checkpoint counts confirmed sends; failed indices are not retried"
            );
        }

        info!(sent, failed = failed.len(), last_index = state.last_index, "publish run finished");
        Ok(PublishOutcome::Done(PublishReport {
            batch: batch_path,
            range,
            sent,
            failed,
            last_index: state.last_index,
            rejected_rows,
        }))
    }

    /// Choose the batch this run publishes from and align `state` with it.
    /// `None` when the outbox holds no post batch at all.
    fn select_batch(
        &self,
        state: &mut PublishState,
    ) -> Result<Option<(PathBuf, BatchRead<PostRecord>)>, PublishError> {
        let dir = &self.settings.outbox_dir;
        let Some(latest) = selector::latest(dir, &self.settings.pattern).map_err(|source| {
            PublishError::Select {
                dir: dir.clone(),
                source,
            }
        })?
        else {
            return Ok(None);
        };
        let latest_name = file_name(&latest);

        if let Some(current) = state.batch.clone().filter(|c| *c != latest_name) {
            match self.settings.batch_policy {
                BatchPolicy::FinishCurrent => {
                    let current_path = dir.join(&current);
                    if let Some(read) = unfinished(&current_path, state) {
                        info!(
                            current = %current,
                            newer = %latest_name,
                            remaining = read.records.len() - state.next_index(),
                            "finishing current batch before the newer one"
                        );
                        return Ok(Some((current_path, read)));
                    }
                    info!(previous = %current, current = %latest_name, "starting newer post batch");
                    *state = PublishState::default();
                }
                BatchPolicy::FollowLatest => {
                    let abandoned = artifact::read_batch::<PostRecord>(&dir.join(&current))
                        .ok()
                        .map(|read| read.records.len().saturating_sub(state.next_index()));
                    warn!(
                        previous = %current,
                        current = %latest_name,
                        ?abandoned,
                        "post batch changed before the previous one was exhausted; keeping position"
                    );
                }
            }
        }

        let read = artifact::read_batch::<PostRecord>(&latest)?;
        Ok(Some((latest, read)))
    }

    /// Attempt every index in `range` once, in order. Returns the confirmed
    /// count and the failed indices.
    async fn send_range(&self, posts: &[PostRecord], range: Range<usize>) -> (usize, Vec<usize>) {
        let mut sent = 0;
        let mut failed = Vec::new();
        for index in range {
            let post = &posts[index];
            let res = match post.image_url() {
                Some(image) => self.channel.send_image(image, &post.text).await,
                None => self.channel.send_text(&post.text).await,
            };
            match res {
                Ok(()) => {
                    sent += 1;
                    info!(index, "post sent");
                }
                Err(err) => {
                    warn!(index, %err, "post failed");
                    failed.push(index);
                }
            }
        }
        (sent, failed)
    }
}

/// The batch at `path` if it can still be read and has posts past the
/// checkpoint.
fn unfinished(path: &Path, state: &PublishState) -> Option<BatchRead<PostRecord>> {
    let read = artifact::read_batch::<PostRecord>(path).ok()?;
    (state.next_index() < read.records.len()).then_some(read)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
