//! Batch media conversion core: job registry, bounded worker pool, external
//! transcoder supervision, folder watching, and progress aggregation.
//!
//! The entry point is [`manager::ConvertManager`]: feed it files and
//! directories, call `start_all`, and consume the [`events`] stream. All
//! heavy work happens on worker tasks; the control surface never blocks on
//! a conversion.

pub mod events;
pub mod manager;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod scan;
pub mod tools;
pub mod watch;
pub mod worker;

pub use vid2mp4_config as config;
pub use vid2mp4_config::Config;

pub use events::{EventReceiver, FailureKind, JobEvent, JobEventKind, JobOutcome};
pub use manager::{ConvertManager, StartAll};
pub use progress::OverallProgress;
pub use registry::{CancelOutcome, JobSnapshot, JobState};
pub use watch::FolderWatch;
