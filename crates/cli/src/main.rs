//! CLI entry point for the vid2mp4 batch converter.
//!
//! Takes files and directories, converts everything convertible, and prints
//! per-job progress from the core's event stream. With `--watch`, keeps
//! running and picks up files dropped into the given directories.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use vid2mp4::{
    Config, ConvertManager, FolderWatch, JobEvent, JobEventKind, JobOutcome, StartAll,
};

/// vid2mp4 - batch media conversion driven by ffmpeg
#[derive(Parser, Debug)]
#[command(name = "vid2mp4")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source files and/or directories (directories are scanned recursively)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum concurrent conversions (overrides config; 0 = logical CPUs)
    #[arg(short = 'j', long)]
    capacity: Option<usize>,

    /// Keep running and convert files that appear in the given directories
    #[arg(short, long, default_value = "false")]
    watch: bool,
}

/// Print one job event; failed outcomes bump the failure counter that
/// decides the process exit code. Returns true for terminal events.
fn render_event(manager: &ConvertManager, event: JobEvent, failures: &mut usize) -> bool {
    let name = event
        .source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| event.source.display().to_string());
    match event.kind {
        JobEventKind::Started => println!("[{}] started", name),
        JobEventKind::Progress(percent) => {
            let overall = manager.overall_progress();
            println!(
                "[{}] {:5.1}%   (overall {:5.1}%, {}/{} done)",
                name, percent, overall.percent, overall.done, overall.total
            );
        }
        JobEventKind::Log(_) => {}
        JobEventKind::Finished(JobOutcome::Done { destination }) => {
            println!("[{}] done -> {}", name, destination.display());
            return true;
        }
        JobEventKind::Finished(JobOutcome::Failed { kind, reason }) => {
            *failures += 1;
            eprintln!("[{}] failed ({}): {}", name, kind, reason);
            return true;
        }
    }
    false
}

/// True once every job is terminal AND a Finished event has been read for
/// each of them. A job's state flips before its Finished event is sent, so
/// an idle registry alone is not proof that the failure count is complete.
fn work_complete(manager: &ConvertManager, finished_seen: usize) -> bool {
    let snapshot = manager.snapshot();
    snapshot.iter().all(|j| !j.state.is_active())
        && finished_seen >= snapshot.iter().filter(|j| j.state.is_terminal()).count()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(capacity) = args.capacity {
        config.pool.capacity = capacity;
    }

    let (manager, mut events) = ConvertManager::new(&config);
    let watch = FolderWatch::new(manager.clone());

    for input in &args.inputs {
        if input.is_dir() {
            watch.watch_dir(input);
        } else if manager.enqueue_file(input).is_none() {
            // Either not a recognized media file, or already enqueued via an
            // earlier argument.
            let already = manager
                .snapshot()
                .iter()
                .any(|j| j.source == vid2mp4::registry::normalize_path(input));
            if !already {
                eprintln!("Skipping {}: not a recognized media file", input.display());
            }
        }
    }

    if args.watch {
        if let Err(e) = watch.enable() {
            eprintln!("Failed to start folder watching: {}", e);
            return ExitCode::FAILURE;
        }
        println!("Watching {} directories; press Ctrl-C to stop.", watch.tracked().len());
    }

    match manager.start_all() {
        StartAll::Dispatched(n) => println!("Converting {} file(s)...", n),
        StartAll::NothingToDo => {
            println!("Nothing to convert.");
            if !args.watch {
                return ExitCode::SUCCESS;
            }
        }
    }

    let mut failures = 0usize;
    let mut finished_seen = 0usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if render_event(&manager, event, &mut failures) {
                    finished_seen += 1;
                }
            }
            _ = ticker.tick() => {
                if args.watch {
                    // Newly watched files may have been enqueued since the
                    // last dispatch round.
                    manager.dispatch_queued();
                } else {
                    while let Ok(event) = events.try_recv() {
                        if render_event(&manager, event, &mut failures) {
                            finished_seen += 1;
                        }
                    }
                    if work_complete(&manager, finished_seen) {
                        break;
                    }
                }
            }
        }
    }

    let overall = manager.overall_progress();
    println!("Finished: {}/{} converted, {} failed.", overall.done, overall.total, failures);
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
