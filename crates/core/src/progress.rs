//! Progress computation: diagnostic time-marker parsing, per-run throttling,
//! and overall completion statistics.

use crate::registry::{JobSnapshot, JobState};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Minimum absolute percent advance between emitted progress events.
pub const MIN_PROGRESS_DELTA: f64 = 0.5;

fn time_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Hours are unbounded: the transcoder reports elapsed time, not clock time.
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid regex"))
}

/// Extract the encode position, in seconds, from one diagnostic line.
///
/// The `time=HH:MM:SS.frac` marker may appear anywhere within the line;
/// returns `None` when no marker is present.
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let caps = time_marker_re().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Completion percent for a known total duration, capped at 100.
pub fn percent_of(elapsed_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (elapsed_secs / duration_secs * 100.0).min(100.0)
}

/// Suppresses progress events that advance less than [`MIN_PROGRESS_DELTA`]
/// since the last emitted value, bounding event volume regardless of how
/// chatty the transcoder is. The terminal 100% is always admitted once.
#[derive(Debug)]
pub struct ProgressThrottle {
    last_emitted: f64,
    finished: bool,
}

impl ProgressThrottle {
    pub fn new() -> Self {
        Self {
            last_emitted: 0.0,
            finished: false,
        }
    }

    /// Returns the percent to emit, or `None` when the update is suppressed.
    /// Emitted values are monotonically non-decreasing within one run.
    pub fn admit(&mut self, percent: f64) -> Option<f64> {
        let percent = percent.clamp(0.0, 100.0);
        if self.finished || percent < self.last_emitted {
            return None;
        }
        if percent >= 100.0 {
            self.finished = true;
            self.last_emitted = 100.0;
            return Some(100.0);
        }
        if percent - self.last_emitted >= MIN_PROGRESS_DELTA {
            self.last_emitted = percent;
            Some(percent)
        } else {
            None
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall completion statistics computed from a registry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverallProgress {
    /// Total tracked jobs.
    pub total: usize,
    /// Jobs in the Done state.
    pub done: usize,
    /// Equal-weight mean of per-job last-known percent.
    pub percent: f64,
}

/// Compute overall progress under the Queued=0 / Done=100 convention.
///
/// This is deliberately an equal-weight-per-job mean, not duration- or
/// byte-weighted.
pub fn aggregate(jobs: &[JobSnapshot]) -> OverallProgress {
    if jobs.is_empty() {
        return OverallProgress {
            total: 0,
            done: 0,
            percent: 0.0,
        };
    }

    let done = jobs.iter().filter(|j| j.state == JobState::Done).count();
    let sum: f64 = jobs
        .iter()
        .map(|j| match j.state {
            JobState::Queued => 0.0,
            JobState::Done => 100.0,
            _ => j.percent,
        })
        .sum();

    OverallProgress {
        total: jobs.len(),
        done,
        percent: sum / jobs.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn snapshot(state: JobState, percent: f64) -> JobSnapshot {
        JobSnapshot {
            source: PathBuf::from("/media/in.avi"),
            destination: PathBuf::from("/media/in.mp4"),
            state,
            percent,
        }
    }

    #[test]
    fn test_parse_time_marker_basic() {
        assert_eq!(parse_time_marker("time=00:01:00.00"), Some(60.0));
        assert_eq!(parse_time_marker("time=01:00:00.00"), Some(3600.0));
        assert_eq!(
            parse_time_marker("frame= 100 fps=25 time=00:00:04.50 bitrate=900k"),
            Some(4.5)
        );
    }

    #[test]
    fn test_parse_time_marker_hours_exceed_24() {
        assert_eq!(parse_time_marker("time=30:00:00.00"), Some(108000.0));
        assert_eq!(parse_time_marker("time=123:00:01.00"), Some(442801.0));
    }

    #[test]
    fn test_parse_time_marker_absent() {
        assert_eq!(parse_time_marker(""), None);
        assert_eq!(parse_time_marker("Press [q] to stop"), None);
        assert_eq!(parse_time_marker("time=N/A bitrate=N/A"), None);
    }

    #[test]
    fn test_percent_of_caps_at_100() {
        assert_eq!(percent_of(60.0, 120.0), 50.0);
        assert_eq!(percent_of(240.0, 120.0), 100.0);
        assert_eq!(percent_of(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_throttle_suppresses_small_advances() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.admit(0.2), None);
        assert_eq!(throttle.admit(0.5), Some(0.5));
        assert_eq!(throttle.admit(0.7), None);
        assert_eq!(throttle.admit(1.0), Some(1.0));
    }

    #[test]
    fn test_throttle_terminal_hundred_always_admitted_once() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.admit(99.8), Some(99.8));
        // Less than the minimum delta away, but terminal.
        assert_eq!(throttle.admit(100.0), Some(100.0));
        assert_eq!(throttle.admit(100.0), None);
    }

    #[test]
    fn test_throttle_never_goes_backwards() {
        let mut throttle = ProgressThrottle::new();
        assert_eq!(throttle.admit(40.0), Some(40.0));
        assert_eq!(throttle.admit(30.0), None);
        assert_eq!(throttle.admit(40.6), Some(40.6));
    }

    #[test]
    fn test_aggregate_empty() {
        let overall = aggregate(&[]);
        assert_eq!(overall.total, 0);
        assert_eq!(overall.done, 0);
        assert_eq!(overall.percent, 0.0);
    }

    #[test]
    fn test_aggregate_mean_convention() {
        let jobs = vec![
            snapshot(JobState::Queued, 0.0),
            snapshot(JobState::Done, 100.0),
            snapshot(JobState::Running, 50.0),
            snapshot(JobState::Failed, 30.0),
        ];
        let overall = aggregate(&jobs);
        assert_eq!(overall.total, 4);
        assert_eq!(overall.done, 1);
        assert!((overall.percent - 45.0).abs() < 1e-9);
    }

    // **Property: Time Marker Round-Trip**
    //
    // *For any* H:MM:SS.frac marker embedded anywhere within a longer line,
    // parsing SHALL recover the elapsed seconds, including H > 24.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_time_marker_round_trip(
            hours in 0u32..200,
            minutes in 0u32..60,
            seconds in 0u32..60,
            centis in 0u32..100,
            prefix in "[a-zA-Z0-9 =.]{0,30}",
            suffix in "[a-zA-Z0-9 =.]{0,30}",
        ) {
            // Keep the surrounding noise free of its own time= marker.
            prop_assume!(!prefix.contains("time="));

            let line = format!(
                "{}time={}:{:02}:{:02}.{:02}{}",
                prefix, hours, minutes, seconds, centis, suffix
            );
            let expected =
                hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds as f64 + centis as f64 / 100.0;

            let parsed = parse_time_marker(&line);
            prop_assert!(parsed.is_some(), "no marker found in {:?}", line);
            prop_assert!((parsed.unwrap() - expected).abs() < 1e-6);
        }

        // **Property: Throttle Emission Contract**
        //
        // Emitted values are non-decreasing, stay in [0, 100], and consecutive
        // emissions differ by at least the minimum delta except for a terminal 100.
        #[test]
        fn prop_throttle_emission_contract(
            percents in prop::collection::vec(0.0f64..=100.0, 1..200),
        ) {
            let mut throttle = ProgressThrottle::new();
            let mut emitted = Vec::new();
            for p in percents {
                if let Some(e) = throttle.admit(p) {
                    emitted.push(e);
                }
            }

            for window in emitted.windows(2) {
                prop_assert!(window[1] >= window[0], "went backwards: {:?}", window);
                let delta = window[1] - window[0];
                prop_assert!(
                    delta >= MIN_PROGRESS_DELTA || window[1] == 100.0,
                    "delta {} below minimum and not terminal",
                    delta
                );
            }
            for e in &emitted {
                prop_assert!((0.0..=100.0).contains(e));
            }
            prop_assert!(emitted.iter().filter(|e| **e == 100.0).count() <= 1);
        }

        // **Property: Aggregate Mean**
        //
        // Overall percent equals the arithmetic mean of per-job contributions
        // under the Queued=0 / Done=100 convention.
        #[test]
        fn prop_aggregate_is_mean(
            entries in prop::collection::vec((0usize..5, 0.0f64..=100.0), 1..50),
        ) {
            let jobs: Vec<JobSnapshot> = entries
                .iter()
                .map(|(state_idx, pct)| {
                    let state = match state_idx {
                        0 => JobState::Queued,
                        1 => JobState::Running,
                        2 => JobState::Cancelling,
                        3 => JobState::Done,
                        _ => JobState::Failed,
                    };
                    snapshot(state, *pct)
                })
                .collect();

            let expected: f64 = jobs
                .iter()
                .map(|j| match j.state {
                    JobState::Queued => 0.0,
                    JobState::Done => 100.0,
                    _ => j.percent,
                })
                .sum::<f64>()
                / jobs.len() as f64;

            let overall = aggregate(&jobs);
            prop_assert!((overall.percent - expected).abs() < 1e-9);
            prop_assert_eq!(overall.total, jobs.len());
        }
    }
}
