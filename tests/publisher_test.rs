use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::{tempdir, TempDir};
use tokio::sync::Mutex;
use trm_autopost::artifact;
use trm_autopost::config::BatchPolicy;
use trm_autopost::channel::{PostChannel, SendError};
use trm_autopost::model::{BatchKind, PostRecord};
use trm_autopost::publisher::{Phase, PublishOutcome, PublishSettings, Publisher};
use trm_autopost::state::{self, PublishState};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SentPost {
    text: String,
    image: Option<String>,
}

#[derive(Clone, Default)]
struct RecordingChannel {
    /// `false` entries fail the corresponding attempt; missing entries succeed.
    script: Arc<Mutex<VecDeque<bool>>>,
    attempts: Arc<Mutex<Vec<SentPost>>>,
    delivered: Arc<Mutex<Vec<SentPost>>>,
}

impl RecordingChannel {
    fn with_script(script: Vec<bool>) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::from(script))),
            ..Default::default()
        }
    }

    async fn record(&self, post: SentPost) -> Result<(), SendError> {
        self.attempts.lock().await.push(post.clone());
        let ok = self.script.lock().await.pop_front().unwrap_or(true);
        if ok {
            self.delivered.lock().await.push(post);
            Ok(())
        } else {
            Err(SendError::Timeout(Duration::from_secs(30)))
        }
    }

    async fn delivered_texts(&self) -> Vec<String> {
        self.delivered
            .lock()
            .await
            .iter()
            .map(|p| p.text.clone())
            .collect()
    }

    async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.len()
    }
}

#[async_trait::async_trait]
impl PostChannel for RecordingChannel {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.record(SentPost {
            text: text.to_string(),
            image: None,
        })
        .await
    }

    async fn send_image(&self, image_url: &str, caption: &str) -> Result<(), SendError> {
        self.record(SentPost {
            text: caption.to_string(),
            image: Some(image_url.to_string()),
        })
        .await
    }
}

fn posts(n: usize) -> Vec<PostRecord> {
    (0..n)
        .map(|i| PostRecord {
            category: "elektronik".into(),
            text: format!("post {i}"),
            image: String::new(),
            link: format!("https://shop/p/{i}"),
        })
        .collect()
}

fn settings(dir: &Path, cap: usize) -> PublishSettings {
    PublishSettings {
        outbox_dir: dir.to_path_buf(),
        pattern: BatchKind::Posts.pattern(),
        state_path: dir.join("post_state.json"),
        posts_per_run: cap,
        batch_policy: BatchPolicy::FinishCurrent,
    }
}

fn write_posts(dir: &Path, stamp: &str, records: &[PostRecord], age_secs: u64) -> PathBuf {
    let path = artifact::write_batch(dir, BatchKind::Posts, stamp, records).unwrap();
    let mtime = SystemTime::now() - Duration::from_secs(age_secs);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
    path
}

fn outbox_with(n: usize) -> (TempDir, PathBuf) {
    let td = tempdir().unwrap();
    let batch = write_posts(td.path(), "20240101_0900", &posts(n), 0);
    (td, batch)
}

#[tokio::test]
async fn three_runs_drain_a_seven_post_batch() {
    let (td, _batch) = outbox_with(7);
    let channel = RecordingChannel::default();
    let publisher = Publisher::new(&channel, settings(td.path(), 5));

    let first = publisher.run().await.unwrap();
    assert_eq!(first.phase(), Phase::Done);
    assert_eq!(first.sent(), 5);
    assert_eq!(state::load(&td.path().join("post_state.json")).last_index, 4);

    let second = publisher.run().await.unwrap();
    assert_eq!(second.sent(), 2);
    assert_eq!(state::load(&td.path().join("post_state.json")).last_index, 6);

    let third = publisher.run().await.unwrap();
    assert!(matches!(
        third,
        PublishOutcome::Exhausted { len: 7, last_index: 6, .. }
    ));
    assert_eq!(third.sent(), 0);

    let expected: Vec<String> = (0..7).map(|i| format!("post {i}")).collect();
    assert_eq!(channel.delivered_texts().await, expected);
}

#[tokio::test]
async fn resumes_after_prior_checkpoint() {
    let (td, _batch) = outbox_with(10);
    let state_path = td.path().join("post_state.json");
    state::save(
        &state_path,
        &PublishState {
            last_index: 2,
            batch: None,
        },
    )
    .unwrap();

    let channel = RecordingChannel::default();
    let outcome = Publisher::new(&channel, settings(td.path(), 4))
        .run()
        .await
        .unwrap();

    let PublishOutcome::Done(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.range, 3..7);
    assert_eq!(report.sent, 4);
    assert_eq!(report.last_index, 6);
    assert_eq!(
        channel.delivered_texts().await,
        vec!["post 3", "post 4", "post 5", "post 6"]
    );

    // Legacy state is now bound to the batch it was consumed against.
    let saved = state::load(&state_path);
    assert_eq!(saved.last_index, 6);
    assert_eq!(saved.batch.as_deref(), Some("trm_posts_20240101_0900.csv"));
}

#[tokio::test]
async fn failures_do_not_stop_the_range_or_advance_the_count() {
    let (td, _batch) = outbox_with(8);
    let state_path = td.path().join("post_state.json");
    state::save(
        &state_path,
        &PublishState {
            last_index: 0,
            batch: None,
        },
    )
    .unwrap();

    // relative positions 1 and 3 fail
    let channel = RecordingChannel::with_script(vec![true, false, true, false, true]);
    let outcome = Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();

    let PublishOutcome::Done(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(channel.attempt_count().await, 5);
    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, vec![2, 4]);
    assert_eq!(report.last_index, 1 + 2);
    assert_eq!(state::load(&state_path).last_index, 3);
    assert_eq!(
        channel.delivered_texts().await,
        vec!["post 1", "post 3", "post 5"]
    );
}

#[tokio::test]
async fn all_failures_leave_checkpoint_in_place() {
    let (td, _batch) = outbox_with(3);
    let channel = RecordingChannel::with_script(vec![false, false, false]);
    let outcome = Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();
    assert_eq!(outcome.sent(), 0);
    assert_eq!(outcome.failed(), 3);
    assert_eq!(state::load(&td.path().join("post_state.json")).last_index, -1);
}

#[tokio::test]
async fn exhausted_run_sends_nothing_and_keeps_state_bytes() {
    let (td, _batch) = outbox_with(3);
    let state_path = td.path().join("post_state.json");
    fs::write(&state_path, "{\n  \"last_index\": 5\n}").unwrap();
    let before = fs::read(&state_path).unwrap();

    let channel = RecordingChannel::default();
    let outcome = Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.phase(), Phase::Exhausted);
    assert_eq!(channel.attempt_count().await, 0);
    assert_eq!(fs::read(&state_path).unwrap(), before);
}

#[tokio::test]
async fn missing_batch_is_no_input() {
    let td = tempdir().unwrap();
    let channel = RecordingChannel::default();
    let outcome = Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();
    assert_eq!(outcome, PublishOutcome::NoInput);
    assert!(!td.path().join("post_state.json").exists());
}

#[tokio::test]
async fn images_are_sent_as_captioned_photos() {
    let td = tempdir().unwrap();
    let mut records = posts(2);
    records[1].image = "https://cdn.example.com/i/1.jpg".into();
    write_posts(td.path(), "20240101_0900", &records, 0);

    let channel = RecordingChannel::default();
    Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();

    let delivered = channel.delivered.lock().await.clone();
    assert_eq!(
        delivered,
        vec![
            SentPost {
                text: "post 0".into(),
                image: None
            },
            SentPost {
                text: "post 1".into(),
                image: Some("https://cdn.example.com/i/1.jpg".into())
            },
        ]
    );
}

fn renamed(prefix: &str, mut records: Vec<PostRecord>) -> Vec<PostRecord> {
    for p in &mut records {
        p.text = format!("{prefix} {}", p.text);
    }
    records
}

#[tokio::test]
async fn current_batch_is_finished_before_a_newer_one_starts() {
    let td = tempdir().unwrap();
    write_posts(td.path(), "20240101_0900", &posts(7), 600);
    let channel = RecordingChannel::default();
    let publisher = Publisher::new(&channel, settings(td.path(), 5));
    publisher.run().await.unwrap();

    write_posts(td.path(), "20240102_0900", &renamed("new", posts(3)), 0);

    let PublishOutcome::Done(report) = publisher.run().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.range, 5..7);
    assert_eq!(report.batch, td.path().join("trm_posts_20240101_0900.csv"));
    let saved = state::load(&td.path().join("post_state.json"));
    assert_eq!(saved.last_index, 6);
    assert_eq!(saved.batch.as_deref(), Some("trm_posts_20240101_0900.csv"));

    let PublishOutcome::Done(report) = publisher.run().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.range, 0..3);
    let saved = state::load(&td.path().join("post_state.json"));
    assert_eq!(saved.last_index, 2);
    assert_eq!(saved.batch.as_deref(), Some("trm_posts_20240102_0900.csv"));

    let third = publisher.run().await.unwrap();
    assert_eq!(third.phase(), Phase::Exhausted);

    let mut expected: Vec<String> = (0..7).map(|i| format!("post {i}")).collect();
    expected.extend((0..3).map(|i| format!("new post {i}")));
    assert_eq!(channel.delivered_texts().await, expected);
}

#[tokio::test]
async fn vanished_current_batch_switches_to_the_newest() {
    let td = tempdir().unwrap();
    let old = write_posts(td.path(), "20240101_0900", &posts(7), 600);
    let channel = RecordingChannel::default();
    let publisher = Publisher::new(&channel, settings(td.path(), 5));
    publisher.run().await.unwrap();

    fs::remove_file(old).unwrap();
    write_posts(td.path(), "20240102_0900", &renamed("new", posts(2)), 0);

    let PublishOutcome::Done(report) = publisher.run().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.range, 0..2);
    assert_eq!(report.batch, td.path().join("trm_posts_20240102_0900.csv"));
}

#[tokio::test]
async fn follow_latest_keeps_position_on_a_newer_batch() {
    let td = tempdir().unwrap();
    write_posts(td.path(), "20240101_0900", &posts(7), 600);
    let channel = RecordingChannel::default();
    let mut s = settings(td.path(), 2);
    s.batch_policy = BatchPolicy::FollowLatest;
    let publisher = Publisher::new(&channel, s);
    publisher.run().await.unwrap();

    write_posts(td.path(), "20240102_0900", &posts(6), 0);
    let PublishOutcome::Done(report) = publisher.run().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(report.range, 2..4);
    assert_eq!(report.batch, td.path().join("trm_posts_20240102_0900.csv"));
}

#[tokio::test]
async fn checkpoint_at_i64_max_is_exhausted() {
    let (td, _batch) = outbox_with(3);
    let state_path = td.path().join("post_state.json");
    fs::write(&state_path, format!("{{\"last_index\": {}}}", i64::MAX)).unwrap();

    let channel = RecordingChannel::default();
    let outcome = Publisher::new(&channel, settings(td.path(), 5))
        .run()
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PublishOutcome::Exhausted { len: 3, last_index: i64::MAX, .. }
    ));
    assert_eq!(channel.attempt_count().await, 0);
}
