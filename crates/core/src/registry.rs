//! Job registry: the canonical store of conversion jobs.
//!
//! Jobs are keyed by normalized absolute source path; the registry enforces
//! the job state machine, enqueue dedup, and per-entry atomic updates. Each
//! entry is the unit of mutual exclusion: workers only ever touch their own
//! job plus map insert/delete, so one lock with short critical sections is
//! enough.

use crate::events::{FailureKind, JobOutcome};
use crate::scan::{has_allowed_extension, normalize_extensions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of a job in the conversion lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be dispatched.
    Queued,
    /// A worker is converting this job.
    Running,
    /// Cancellation requested; the worker has not yet terminated.
    Cancelling,
    /// Conversion succeeded.
    Done,
    /// Conversion failed or was cancelled; eligible for explicit restart.
    Failed,
}

impl JobState {
    /// Queued, Running, or Cancelling.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running | JobState::Cancelling)
    }

    /// Done or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Cancelling => write!(f, "cancelling"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    /// Normalized absolute source path (the job key).
    pub source: PathBuf,
    /// Derived destination path.
    pub destination: PathBuf,
    pub state: JobState,
    /// Last-reported progress percent in [0, 100].
    pub percent: f64,
}

/// What a cancel request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A running worker was signalled; it will terminate the transcoder at
    /// the next line boundary.
    SignalledWorker,
    /// The job had not been dispatched yet and was removed outright.
    RemovedQueued,
    /// Nothing to do (unknown job or already terminal).
    Ignored,
}

struct JobEntry {
    destination: PathBuf,
    state: JobState,
    percent: f64,
    /// Set once a dispatch task exists for this job; guarantees at most one
    /// active worker per job even across overlapping "start all" calls.
    dispatched: bool,
    /// Cooperative cancellation flag shared with the active worker.
    cancel: Option<Arc<AtomicBool>>,
}

/// Canonical job store keyed by normalized source path.
pub struct Registry {
    jobs: Mutex<HashMap<PathBuf, JobEntry>>,
    extensions: Vec<String>,
    target_extension: String,
}

impl Registry {
    pub fn new(extensions: Vec<String>, target_extension: String) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            extensions: normalize_extensions(&extensions),
            target_extension: target_extension.trim_start_matches('.').to_string(),
        }
    }

    /// Enqueue a source file as a new Queued job.
    ///
    /// The path is normalized first; disallowed extensions and duplicate
    /// keys are silently ignored (duplicate enqueue is the normal case for
    /// watch-driven rescans, never an error). Returns the normalized key
    /// when a job was actually created.
    pub fn enqueue(&self, path: &Path) -> Option<PathBuf> {
        let source = normalize_path(path);
        if !has_allowed_extension(&source, &self.extensions) {
            return None;
        }

        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&source) {
            return None;
        }

        let destination = source.with_extension(&self.target_extension);
        jobs.insert(
            source.clone(),
            JobEntry {
                destination,
                state: JobState::Queued,
                percent: 0.0,
                dispatched: false,
                cancel: None,
            },
        );
        Some(source)
    }

    /// Remove a job; permitted only while it is Queued.
    pub fn remove(&self, path: &Path) -> bool {
        let source = normalize_path(path);
        let mut jobs = self.jobs.lock();
        match jobs.get(&source) {
            Some(entry) if entry.state == JobState::Queued => {
                jobs.remove(&source);
                true
            }
            _ => false,
        }
    }

    /// Paths of all jobs currently in the given state.
    pub fn list_by_state(&self, state: JobState) -> Vec<PathBuf> {
        self.jobs
            .lock()
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Point-in-time view of every tracked job.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs
            .lock()
            .iter()
            .map(|(path, entry)| JobSnapshot {
                source: path.clone(),
                destination: entry.destination.clone(),
                state: entry.state,
                percent: entry.percent,
            })
            .collect()
    }

    /// Normalized allowed source extensions.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.jobs.lock().contains_key(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Request cancellation of a job.
    ///
    /// A running (or already cancelling) job has its flag raised and moves
    /// to Cancelling; a queued job is removed outright. Cancellation always
    /// resolves to Failed, never a separate terminal state.
    pub fn request_cancel(&self, path: &Path) -> CancelOutcome {
        let source = normalize_path(path);
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(&source) {
            Some(entry) if matches!(entry.state, JobState::Running | JobState::Cancelling) => {
                if let Some(flag) = &entry.cancel {
                    flag.store(true, Ordering::SeqCst);
                }
                entry.state = JobState::Cancelling;
                CancelOutcome::SignalledWorker
            }
            Some(entry) if entry.state == JobState::Queued => {
                jobs.remove(&source);
                CancelOutcome::RemovedQueued
            }
            _ => CancelOutcome::Ignored,
        }
    }

    /// Claim a Queued job for dispatch. Exclusive: a second claim for the
    /// same job fails until the job is resubmitted or finished.
    pub(crate) fn mark_dispatched(&self, path: &Path) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(path) {
            Some(entry) if entry.state == JobState::Queued && !entry.dispatched => {
                entry.dispatched = true;
                true
            }
            _ => false,
        }
    }

    /// Transition Queued -> Running once a pool permit is held.
    ///
    /// Returns the destination and a fresh cancellation flag, or `None` when
    /// the job was removed (or otherwise left Queued) while waiting for
    /// admission.
    pub(crate) fn begin_run(&self, path: &Path) -> Option<(PathBuf, Arc<AtomicBool>)> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(path)?;
        if entry.state != JobState::Queued {
            return None;
        }
        let flag = Arc::new(AtomicBool::new(false));
        entry.state = JobState::Running;
        entry.percent = 0.0;
        entry.cancel = Some(flag.clone());
        Some((entry.destination.clone(), flag))
    }

    /// Record throttled progress for an active run. Percent is monotone
    /// non-decreasing within one run; stale or backwards updates are dropped.
    pub(crate) fn record_progress(&self, path: &Path, percent: f64) {
        let mut jobs = self.jobs.lock();
        if let Some(entry) = jobs.get_mut(path) {
            if matches!(entry.state, JobState::Running | JobState::Cancelling) {
                let percent = percent.clamp(0.0, 100.0);
                if percent > entry.percent {
                    entry.percent = percent;
                }
            }
        }
    }

    /// Record the terminal outcome of a run and return the effective one.
    ///
    /// A success that races a cancellation request (flag raised after the
    /// worker's last check) is coerced to a cancelled failure so a job never
    /// lands in Done once cancellation was requested.
    pub(crate) fn finish(&self, path: &Path, outcome: JobOutcome) -> JobOutcome {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(path) else {
            return outcome;
        };

        let effective = if entry.state == JobState::Cancelling && outcome.is_done() {
            JobOutcome::Failed {
                kind: FailureKind::Cancelled,
                reason: "conversion cancelled".to_string(),
            }
        } else {
            outcome
        };

        match &effective {
            JobOutcome::Done { .. } => {
                entry.state = JobState::Done;
                entry.percent = 100.0;
            }
            JobOutcome::Failed { .. } => {
                entry.state = JobState::Failed;
            }
        }
        entry.dispatched = false;
        entry.cancel = None;
        effective
    }

    /// Explicit resubmission: Failed -> Queued with progress reset.
    pub(crate) fn resubmit(&self, path: &Path) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(path) {
            Some(entry) if entry.state == JobState::Failed => {
                entry.state = JobState::Queued;
                entry.percent = 0.0;
                entry.dispatched = false;
                entry.cancel = None;
                true
            }
            _ => false,
        }
    }
}

/// Lexically normalize a path to an absolute form: joined onto the current
/// directory when relative, with `.` removed and `..` folded. Symlinks are
/// not resolved, matching plain absolute-path semantics.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
