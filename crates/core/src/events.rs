//! Job event types delivered to external listeners.
//!
//! The core never touches a UI directly; everything observable about a job
//! flows through one tagged event stream that subscribers (CLI, GUI, tests)
//! consume at their own pace.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Classification of a job failure, for remediation guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The transcoder executable could not be spawned at all.
    /// A configuration problem, not an encode problem.
    ExecutableNotFound,
    /// The transcoder ran but exited unsuccessfully.
    EncodeFailed,
    /// The job was cancelled; destination contents are unspecified.
    Cancelled,
    /// Unexpected error while managing the process.
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ExecutableNotFound => write!(f, "executable_not_found"),
            FailureKind::EncodeFailed => write!(f, "encode_failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Internal => write!(f, "internal"),
        }
    }
}

/// Terminal outcome of one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Conversion succeeded; the destination file was produced.
    Done { destination: PathBuf },
    /// Conversion failed; no destination guarantee.
    Failed { kind: FailureKind, reason: String },
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }
}

/// What happened, without saying for which job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// The worker picked up the job and is about to probe/transcode.
    Started,
    /// Throttled completion percent in [0, 100].
    Progress(f64),
    /// One raw line of transcoder diagnostic output.
    Log(String),
    /// The run reached a terminal state.
    Finished(JobOutcome),
}

/// One event on a job's ordered stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    /// Normalized source path identifying the job.
    pub source: PathBuf,
    pub kind: JobEventKind,
}

pub type EventSender = mpsc::UnboundedSender<JobEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Create the event channel connecting the core to its subscriber.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
