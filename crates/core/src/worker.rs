//! Conversion worker: probes duration, supervises the external transcoder,
//! and turns its diagnostic stream into job events.
//!
//! The transcoder writes progress onto its error stream, one unstructured
//! line at a time. The worker forwards every line as a log event, extracts
//! `time=` markers for percent computation, and checks the cancellation
//! flag at each line boundary, escalating straight to a process kill once
//! it is observed.

use crate::events::{FailureKind, JobEventKind};
use crate::progress::{parse_time_marker, percent_of, ProgressThrottle};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Error type for conversion runs
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The transcoder executable could not be spawned; a configuration
    /// problem, distinct from an encode failure.
    #[error("transcoder executable not found: {0}")]
    ExecutableNotFound(String),

    /// The transcoder exited with a non-zero code.
    #[error("transcoder exited with code {0}")]
    EncodeFailed(i32),

    /// The transcoder was terminated by a signal.
    #[error("transcoder terminated by signal")]
    Terminated,

    /// The run was cancelled; the process was killed mid-write.
    #[error("conversion cancelled")]
    Cancelled,

    /// IO error while managing the process.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ConvertError::ExecutableNotFound(_) => FailureKind::ExecutableNotFound,
            ConvertError::EncodeFailed(_) | ConvertError::Terminated => FailureKind::EncodeFailed,
            ConvertError::Cancelled => FailureKind::Cancelled,
            ConvertError::Io(_) => FailureKind::Internal,
        }
    }
}

/// Everything needed to run one conversion.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Transcoder executable.
    pub ffmpeg: PathBuf,
    /// Fixed arguments between `-i <source>` and `-y <destination>`.
    pub preset_args: Vec<String>,
}

/// Best-effort duration probe.
///
/// Runs the probe executable asking for the container duration as bare
/// decimal seconds on stdout. Any failure mode (missing executable, error
/// exit, timeout, non-numeric output) yields `None`; the job still runs,
/// with progress degraded to start/finish only.
pub async fn probe_duration(ffprobe: &Path, source: &Path, timeout: Duration) -> Option<f64> {
    let result = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(source)
            .stdin(Stdio::null())
            // A timed-out probe must not leave ffprobe running; the child is
            // killed when the dropped future releases it.
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) => output,
        _ => return None,
    };
    if !output.status.success() {
        return None;
    }
    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the probe's stdout into a positive, finite duration.
pub fn parse_probe_output(text: &str) -> Option<f64> {
    let secs: f64 = text.trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

/// Build the transcode invocation: `<ffmpeg> -i <source> <preset> -y <destination>`.
///
/// Diagnostic output is captured from the error stream; the primary output
/// stream is discarded.
pub fn build_ffmpeg_command(request: &ConvertRequest) -> Command {
    let mut cmd = Command::new(&request.ffmpeg);
    cmd.arg("-i").arg(&request.source);
    cmd.args(&request.preset_args);
    cmd.arg("-y").arg(&request.destination);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    cmd
}

/// How the diagnostic stream ended.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The transcoder closed its error stream (it is exiting).
    Eof,
    /// The cancellation flag was observed at a line boundary.
    Cancelled,
}

/// Pump the diagnostic stream line by line.
///
/// Each line is forwarded as a log event and scanned for a progress marker;
/// percent events are throttled. The cancellation flag is checked before
/// each line is processed, so cancellation latency is bounded by the
/// interval between diagnostic lines.
fn pump_diagnostics<R, F>(
    reader: R,
    cancel: &AtomicBool,
    duration: Option<f64>,
    emit: &mut F,
) -> io::Result<StreamEnd>
where
    R: BufRead,
    F: FnMut(JobEventKind),
{
    let mut throttle = ProgressThrottle::new();

    for line in reader.lines() {
        if cancel.load(Ordering::SeqCst) {
            return Ok(StreamEnd::Cancelled);
        }
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            emit(JobEventKind::Log(trimmed.to_string()));
        }
        if let (Some(elapsed), Some(total)) = (parse_time_marker(trimmed), duration) {
            if let Some(percent) = throttle.admit(percent_of(elapsed, total)) {
                emit(JobEventKind::Progress(percent));
            }
        }
    }

    Ok(StreamEnd::Eof)
}

/// Run one conversion to completion. Blocking; call from a blocking task.
///
/// Spawns the transcoder, streams its diagnostics through `emit`, and maps
/// the exit into a result: code 0 is success (percent forced to 100),
/// non-zero is an encode failure, and an observed cancellation kills the
/// process immediately without waiting for natural exit.
pub fn run_convert<F>(
    request: &ConvertRequest,
    duration: Option<f64>,
    cancel: &AtomicBool,
    emit: &mut F,
) -> Result<(), ConvertError>
where
    F: FnMut(JobEventKind),
{
    let mut child = match build_ffmpeg_command(request).spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConvertError::ExecutableNotFound(
                request.ffmpeg.display().to_string(),
            ));
        }
        Err(e) => return Err(ConvertError::Io(e)),
    };

    let stream_end = match child.stderr.take() {
        Some(stderr) => pump_diagnostics(BufReader::new(stderr), cancel, duration, emit),
        None => Ok(StreamEnd::Eof),
    };

    match stream_end {
        Ok(StreamEnd::Cancelled) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ConvertError::Cancelled)
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(ConvertError::Io(e))
        }
        Ok(StreamEnd::Eof) => {
            let status = child.wait()?;
            // A cancel that lands after the last diagnostic line still must
            // not resolve to success.
            if cancel.load(Ordering::SeqCst) {
                return Err(ConvertError::Cancelled);
            }
            if status.success() {
                emit(JobEventKind::Progress(100.0));
                Ok(())
            } else {
                match status.code() {
                    Some(code) => Err(ConvertError::EncodeFailed(code)),
                    None => Err(ConvertError::Terminated),
                }
            }
        }
    }
}
