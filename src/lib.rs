//! Scrapes catalog category pages, renders product posts, and publishes them
//! to a Telegram channel in resumable slices.
//!
//! - `catalog`: category page fetching and product extraction.
//! - `formatter`: product → post rendering.
//! - `artifact` / `selector`: dated CSV batches and picking the newest one.
//! - `state` / `publisher`: the publish checkpoint and the run state machine.
//! - `pipeline`: stage runners used by the binaries.

pub mod artifact;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod formatter;
pub mod model;
pub mod pipeline;
pub mod publisher;
pub mod selector;
pub mod state;
