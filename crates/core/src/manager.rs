//! Conversion manager: the orchestration facade over registry, pool, and
//! workers.
//!
//! The manager owns the job lifecycle end to end: intake (files and
//! directory scans), dispatch under the pool's concurrency bound, the
//! per-job worker task, cancellation, restart, and aggregate progress.
//! Subscribers observe everything through the event stream; none of the
//! control methods block on conversion work.

use crate::events::{
    event_channel, EventReceiver, EventSender, FailureKind, JobEvent, JobEventKind, JobOutcome,
};
use crate::pool::WorkerPool;
use crate::progress::{aggregate, OverallProgress};
use crate::registry::{CancelOutcome, JobSnapshot, JobState, Registry};
use crate::scan::scan_recursive;
use crate::tools::Toolchain;
use crate::worker::{probe_duration, run_convert, ConvertRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vid2mp4_config::Config;

/// What a "start everything" request found to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAll {
    /// This many jobs were handed to the pool.
    Dispatched(usize),
    /// No queued or restartable jobs existed.
    NothingToDo,
}

/// Orchestrates conversion jobs; cheap to clone by `Arc`.
pub struct ConvertManager {
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
    toolchain: Toolchain,
    preset_args: Vec<String>,
    probe_timeout: Duration,
    events: EventSender,
}

impl ConvertManager {
    /// Build a manager from configuration; returns the receiving half of
    /// the event stream alongside it.
    ///
    /// A configured pool capacity of zero means one worker per logical CPU.
    pub fn new(cfg: &Config) -> (Arc<Self>, EventReceiver) {
        let capacity = if cfg.pool.capacity == 0 {
            num_cpus::get()
        } else {
            cfg.pool.capacity
        };
        let toolchain = Toolchain::resolve(&cfg.tools);
        info!(
            capacity,
            ffmpeg = %toolchain.ffmpeg.display(),
            ffprobe = %toolchain.ffprobe.display(),
            "conversion manager starting"
        );

        let (events, receiver) = event_channel();
        let manager = Arc::new(Self {
            registry: Arc::new(Registry::new(
                cfg.intake.extensions.clone(),
                cfg.encode.target_extension.clone(),
            )),
            pool: Arc::new(WorkerPool::new(capacity)),
            toolchain,
            preset_args: cfg.encode.preset_args.clone(),
            probe_timeout: Duration::from_secs(cfg.tools.probe_timeout_secs),
            events,
        });
        (manager, receiver)
    }

    /// Enqueue a single file. Returns the normalized job key when a new job
    /// was created; duplicates and disallowed extensions yield `None`.
    pub fn enqueue_file(&self, path: &Path) -> Option<PathBuf> {
        let key = self.registry.enqueue(path);
        if let Some(key) = &key {
            debug!(source = %key.display(), "job enqueued");
        }
        key
    }

    /// Recursively scan a directory and enqueue every convertible file.
    /// Returns the number of jobs actually created.
    pub fn add_directory(&self, dir: &Path) -> usize {
        let found = scan_recursive(dir, self.registry.extensions());
        let added = found
            .iter()
            .filter(|path| self.registry.enqueue(path).is_some())
            .count();
        info!(dir = %dir.display(), found = found.len(), added, "directory scanned");
        added
    }

    /// Shallow rescan of a single directory, used by the watch layer.
    /// Registry dedup makes repeated rescans of the same content idempotent.
    pub fn rescan_shallow(&self, dir: &Path) -> usize {
        crate::scan::scan_shallow(dir, self.registry.extensions())
            .iter()
            .filter(|path| self.registry.enqueue(path).is_some())
            .count()
    }

    /// Dispatch every queued job, resubmitting failed ones first.
    pub fn start_all(self: &Arc<Self>) -> StartAll {
        for path in self.registry.list_by_state(JobState::Failed) {
            self.registry.resubmit(&path);
        }

        let dispatched = self.dispatch_queued();
        if dispatched == 0 {
            StartAll::NothingToDo
        } else {
            info!(dispatched, "jobs dispatched");
            StartAll::Dispatched(dispatched)
        }
    }

    /// Dispatch queued jobs only, leaving failed ones alone. Used by watch
    /// mode to pick up newly enqueued files without endlessly retrying
    /// failures.
    pub fn dispatch_queued(self: &Arc<Self>) -> usize {
        self.registry
            .list_by_state(JobState::Queued)
            .into_iter()
            .filter(|path| self.dispatch(path.clone()))
            .count()
    }

    /// Restart one failed job. Returns `false` when the job is unknown or
    /// not in the Failed state.
    pub fn restart(self: &Arc<Self>, path: &Path) -> bool {
        let key = crate::registry::normalize_path(path);
        if !self.registry.resubmit(&key) {
            return false;
        }
        self.dispatch(key)
    }

    /// Claim a queued job and spawn its worker task. The claim is exclusive,
    /// so overlapping start requests cannot double-dispatch a job.
    fn dispatch(self: &Arc<Self>, path: PathBuf) -> bool {
        if !self.registry.mark_dispatched(&path) {
            return false;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_job(path).await;
        });
        true
    }

    async fn run_job(self: Arc<Self>, source: PathBuf) {
        let _permit = self.pool.acquire().await;

        // The job may have been cancelled (removed) while queued behind the
        // pool; in that case there is nothing to run.
        let Some((destination, cancel)) = self.registry.begin_run(&source) else {
            return;
        };

        info!(source = %source.display(), dest = %destination.display(), "conversion started");
        self.emit(&source, JobEventKind::Started);

        let duration = probe_duration(&self.toolchain.ffprobe, &source, self.probe_timeout).await;
        if duration.is_none() {
            warn!(source = %source.display(), "duration probe failed");
            self.emit(
                &source,
                JobEventKind::Log(
                    "could not read source duration; progress will be start/finish only"
                        .to_string(),
                ),
            );
        }

        let request = ConvertRequest {
            source: source.clone(),
            destination: destination.clone(),
            ffmpeg: self.toolchain.ffmpeg.clone(),
            preset_args: self.preset_args.clone(),
        };

        let worker_manager = self.clone();
        let worker_source = source.clone();
        let result = tokio::task::spawn_blocking(move || {
            run_convert(&request, duration, &cancel, &mut |kind| {
                if let JobEventKind::Progress(percent) = &kind {
                    worker_manager
                        .registry
                        .record_progress(&worker_source, *percent);
                }
                worker_manager.emit(&worker_source, kind);
            })
        })
        .await;

        let outcome = match result {
            Ok(Ok(())) => JobOutcome::Done {
                destination: destination.clone(),
            },
            Ok(Err(err)) => JobOutcome::Failed {
                kind: err.failure_kind(),
                reason: err.to_string(),
            },
            Err(join_err) => {
                warn!(source = %source.display(), error = %join_err, "worker task failed");
                JobOutcome::Failed {
                    kind: FailureKind::Internal,
                    reason: "conversion task panicked".to_string(),
                }
            }
        };

        // Success racing a cancel request resolves to a cancelled failure.
        let effective = self.registry.finish(&source, outcome);
        match &effective {
            JobOutcome::Done { destination } => {
                info!(source = %source.display(), dest = %destination.display(), "conversion done");
            }
            JobOutcome::Failed { kind, reason } => {
                warn!(source = %source.display(), %kind, reason, "conversion failed");
            }
        }
        self.emit(&source, JobEventKind::Finished(effective));
    }

    fn emit(&self, source: &Path, kind: JobEventKind) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.events.send(JobEvent {
            source: source.to_path_buf(),
            kind,
        });
    }

    /// Request cancellation of one job. See [`CancelOutcome`].
    pub fn cancel(&self, path: &Path) -> CancelOutcome {
        let outcome = self.registry.request_cancel(path);
        debug!(source = %path.display(), ?outcome, "cancel requested");
        outcome
    }

    /// Cancel every running job. Queued jobs are untouched; cancel them
    /// individually or let them run. Returns the number of signalled workers.
    pub fn cancel_all(&self) -> usize {
        let mut signalled = 0;
        for path in self.registry.list_by_state(JobState::Running) {
            if self.registry.request_cancel(&path) == CancelOutcome::SignalledWorker {
                signalled += 1;
            }
        }
        signalled
    }

    /// Remove a queued job from the registry.
    pub fn remove(&self, path: &Path) -> bool {
        self.registry.remove(path)
    }

    /// Adjust worker-pool capacity at runtime; never preempts running jobs.
    pub fn set_capacity(&self, capacity: usize) {
        self.pool.set_capacity(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Equal-weight overall completion across all tracked jobs.
    pub fn overall_progress(&self) -> OverallProgress {
        aggregate(&self.registry.snapshot())
    }

    /// Point-in-time view of every tracked job.
    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.registry.snapshot()
    }

    /// True while any job is queued, running, or cancelling.
    pub fn has_active_jobs(&self) -> bool {
        self.snapshot().iter().any(|j| j.state.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn test_config(ffmpeg: &str, capacity: usize) -> Config {
        let mut cfg = Config::default();
        cfg.tools.ffmpeg = ffmpeg.to_string();
        cfg.tools.ffprobe = "/nonexistent/vid2mp4-test-ffprobe".to_string();
        cfg.tools.bundle_dir = Some(PathBuf::from("/nonexistent"));
        cfg.pool.capacity = capacity;
        cfg
    }

    async fn drain_until_finished(
        rx: &mut EventReceiver,
        source: &Path,
    ) -> (JobOutcome, Vec<JobEventKind>) {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("event stream should not stall")
                .expect("event stream should stay open");
            if event.source != source {
                continue;
            }
            if let JobEventKind::Finished(outcome) = &event.kind {
                let outcome = outcome.clone();
                seen.push(event.kind);
                return (outcome, seen);
            }
            seen.push(event.kind);
        }
    }

    #[tokio::test]
    async fn test_start_all_with_empty_queue() {
        let (manager, _rx) = ConvertManager::new(&test_config("ffmpeg", 1));
        assert_eq!(manager.start_all(), StartAll::NothingToDo);
    }

    #[tokio::test]
    async fn test_enqueue_dedup_across_entry_points() {
        let temp = TempDir::new().unwrap();
        let film = temp.path().join("film.avi");
        File::create(&film).unwrap();

        let (manager, _rx) = ConvertManager::new(&test_config("ffmpeg", 1));
        assert!(manager.enqueue_file(&film).is_some());
        // A directory scan finding the same file creates nothing new.
        assert_eq!(manager.add_directory(temp.path()), 0);
        assert_eq!(manager.rescan_shallow(temp.path()), 0);
        assert_eq!(manager.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_add_directory_enqueues_recursively() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("season1");
        std::fs::create_dir_all(&nested).unwrap();
        File::create(temp.path().join("a.avi")).unwrap();
        File::create(nested.join("b.mkv")).unwrap();
        File::create(nested.join("notes.txt")).unwrap();

        let (manager, _rx) = ConvertManager::new(&test_config("ffmpeg", 1));
        assert_eq!(manager.add_directory(temp.path()), 2);
    }

    #[tokio::test]
    async fn test_missing_executable_fails_job() {
        let temp = TempDir::new().unwrap();
        let film = temp.path().join("film.avi");
        File::create(&film).unwrap();

        let (manager, mut rx) =
            ConvertManager::new(&test_config("/nonexistent/vid2mp4-test-ffmpeg", 1));
        let key = manager.enqueue_file(&film).expect("queued");
        assert_eq!(manager.start_all(), StartAll::Dispatched(1));

        let (outcome, _) = drain_until_finished(&mut rx, &key).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                kind: FailureKind::ExecutableNotFound,
                ..
            }
        ));
        assert_eq!(manager.snapshot()[0].state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_removes_it() {
        let temp = TempDir::new().unwrap();
        let film = temp.path().join("film.avi");
        File::create(&film).unwrap();

        let (manager, _rx) = ConvertManager::new(&test_config("ffmpeg", 1));
        let key = manager.enqueue_file(&film).expect("queued");
        assert_eq!(manager.cancel(&key), CancelOutcome::RemovedQueued);
        assert!(manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_restart_requires_failed_state() {
        let temp = TempDir::new().unwrap();
        let film = temp.path().join("film.avi");
        File::create(&film).unwrap();

        let (manager, _rx) = ConvertManager::new(&test_config("ffmpeg", 1));
        let key = manager.enqueue_file(&film).expect("queued");
        // Still queued: restart is refused.
        assert!(!manager.restart(&key));
        assert!(!manager.restart(Path::new("/media/unknown.avi")));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_tool(dir: &Path, name: &str, script_body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn scripted_config(bin_dir: &Path, ffmpeg_body: &str, ffprobe_body: &str) -> Config {
            let ffmpeg = fake_tool(bin_dir, "fake-ffmpeg", ffmpeg_body);
            let ffprobe = fake_tool(bin_dir, "fake-ffprobe", ffprobe_body);
            let mut cfg = Config::default();
            cfg.tools.ffmpeg = ffmpeg.to_string_lossy().into_owned();
            cfg.tools.ffprobe = ffprobe.to_string_lossy().into_owned();
            cfg.tools.bundle_dir = Some(PathBuf::from("/nonexistent"));
            cfg.pool.capacity = 2;
            cfg
        }

        #[tokio::test]
        async fn test_end_to_end_success_with_progress() {
            let temp = TempDir::new().unwrap();
            let film = temp.path().join("film.avi");
            File::create(&film).unwrap();

            let cfg = scripted_config(
                temp.path(),
                "echo 'frame=1 time=00:00:30.00 speed=2x' 1>&2\n\
                 echo 'frame=2 time=00:01:00.00 speed=2x' 1>&2\n\
                 exit 0",
                "echo '60.0'",
            );
            let (manager, mut rx) = ConvertManager::new(&cfg);
            let key = manager.enqueue_file(&film).expect("queued");
            assert_eq!(manager.start_all(), StartAll::Dispatched(1));

            let (outcome, events) = drain_until_finished(&mut rx, &key).await;
            assert!(outcome.is_done());
            assert_eq!(events.first(), Some(&JobEventKind::Started));
            assert!(events.contains(&JobEventKind::Progress(50.0)));
            assert!(events.contains(&JobEventKind::Progress(100.0)));

            let snapshot = &manager.snapshot()[0];
            assert_eq!(snapshot.state, JobState::Done);
            assert_eq!(snapshot.percent, 100.0);
            assert_eq!(snapshot.destination, film.with_extension("mp4"));
        }

        #[tokio::test]
        async fn test_failed_probe_degrades_but_job_succeeds() {
            let temp = TempDir::new().unwrap();
            let film = temp.path().join("film.avi");
            File::create(&film).unwrap();

            let cfg = scripted_config(temp.path(), "exit 0", "exit 1");
            let (manager, mut rx) = ConvertManager::new(&cfg);
            let key = manager.enqueue_file(&film).expect("queued");
            manager.start_all();

            let (outcome, events) = drain_until_finished(&mut rx, &key).await;
            assert!(outcome.is_done());
            assert!(events.iter().any(|e| matches!(
                e,
                JobEventKind::Log(msg) if msg.contains("could not read source duration")
            )));
        }

        #[tokio::test]
        async fn test_encode_failure_and_restart() {
            let temp = TempDir::new().unwrap();
            let film = temp.path().join("film.avi");
            File::create(&film).unwrap();

            let cfg = scripted_config(temp.path(), "echo 'boom' 1>&2\nexit 2", "echo '10.0'");
            let (manager, mut rx) = ConvertManager::new(&cfg);
            let key = manager.enqueue_file(&film).expect("queued");
            manager.start_all();

            let (outcome, _) = drain_until_finished(&mut rx, &key).await;
            assert!(matches!(
                outcome,
                JobOutcome::Failed {
                    kind: FailureKind::EncodeFailed,
                    ..
                }
            ));

            // Failed jobs can be restarted; the second run fails the same way.
            assert!(manager.restart(&key));
            let (outcome, _) = drain_until_finished(&mut rx, &key).await;
            assert!(!outcome.is_done());
        }

        #[tokio::test]
        async fn test_cancel_running_job() {
            let temp = TempDir::new().unwrap();
            let film = temp.path().join("film.avi");
            File::create(&film).unwrap();

            let cfg = scripted_config(
                temp.path(),
                "while true; do echo 'frame time=00:00:01.00' 1>&2; sleep 0.05; done",
                "echo '600.0'",
            );
            let (manager, mut rx) = ConvertManager::new(&cfg);
            let key = manager.enqueue_file(&film).expect("queued");
            manager.start_all();

            // Wait until the worker reports it started, then cancel.
            loop {
                let event = rx.recv().await.expect("event");
                if event.kind == JobEventKind::Started {
                    break;
                }
            }
            assert_eq!(manager.cancel(&key), CancelOutcome::SignalledWorker);

            let (outcome, _) = drain_until_finished(&mut rx, &key).await;
            assert!(matches!(
                outcome,
                JobOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    ..
                }
            ));
            assert_eq!(manager.snapshot()[0].state, JobState::Failed);
        }

        #[tokio::test]
        async fn test_pool_bounds_concurrency() {
            let temp = TempDir::new().unwrap();
            for name in ["a.avi", "b.avi", "c.avi"] {
                File::create(temp.path().join(name)).unwrap();
            }

            let mut cfg = scripted_config(temp.path(), "sleep 0.2\nexit 0", "echo '1.0'");
            cfg.pool.capacity = 1;
            let (manager, mut rx) = ConvertManager::new(&cfg);
            assert_eq!(manager.add_directory(temp.path()), 3);
            assert_eq!(manager.start_all(), StartAll::Dispatched(3));

            // With one permit, Started events never overlap: each Finished
            // precedes the next Started.
            let mut running = 0usize;
            let mut finished = 0;
            while finished < 3 {
                let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                    .await
                    .expect("no stall")
                    .expect("open");
                match event.kind {
                    JobEventKind::Started => {
                        running += 1;
                        assert!(running <= 1, "two jobs running under capacity 1");
                    }
                    JobEventKind::Finished(_) => {
                        running -= 1;
                        finished += 1;
                    }
                    _ => {}
                }
            }
            assert_eq!(manager.overall_progress().done, 3);
        }
    }
}
