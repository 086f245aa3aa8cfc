//! Resolution of the transcoder and probe executables.
//!
//! Deployment bundles may ship their own ffmpeg/ffprobe next to the binary;
//! when present those absolute paths win over the ambient search-path names.

use std::path::{Path, PathBuf};
use vid2mp4_config::ToolsConfig;

/// Resolved executable paths for one process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Toolchain {
    /// Resolve tool paths from configuration plus bundled-binary detection.
    ///
    /// The configured `bundle_dir` (or, when unset, the running executable's
    /// directory) is probed for `ffmpeg`/`ffprobe`; each tool falls back to
    /// its configured name independently.
    pub fn resolve(cfg: &ToolsConfig) -> Self {
        let bundle_dir = cfg.bundle_dir.clone().or_else(default_bundle_dir);
        Self::resolve_in(cfg, bundle_dir.as_deref())
    }

    /// Resolution against an explicit bundle directory; separated for tests.
    pub fn resolve_in(cfg: &ToolsConfig, bundle_dir: Option<&Path>) -> Self {
        Self {
            ffmpeg: pick_tool(bundle_dir, "ffmpeg", &cfg.ffmpeg),
            ffprobe: pick_tool(bundle_dir, "ffprobe", &cfg.ffprobe),
        }
    }
}

fn pick_tool(bundle_dir: Option<&Path>, base: &str, fallback: &str) -> PathBuf {
    if let Some(dir) = bundle_dir {
        let candidate = dir.join(exe_name(base));
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(fallback)
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", base)
    } else {
        base.to_string()
    }
}

fn default_bundle_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()?
        .parent()
        .map(|p| p.to_path_buf())
}
