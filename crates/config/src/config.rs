//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Source intake configuration: which container extensions are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntakeConfig {
    /// Recognized source container extensions (without the leading dot,
    /// matched case-insensitively).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    [
        "avi", "mkv", "mov", "wmv", "flv", "mts", "mpg", "mpeg", "mp4", "m4v", "3gp", "3g2",
        "ts", "webm", "vob",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

/// Encoding configuration: the fixed transcoder argument preset and the
/// destination container extension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    /// Arguments placed between `-i <source>` and `-y <destination>`.
    #[serde(default = "default_preset_args")]
    pub preset_args: Vec<String>,
    /// Destination extension (without the leading dot).
    #[serde(default = "default_target_extension")]
    pub target_extension: String,
}

fn default_preset_args() -> Vec<String> {
    ["-c:v", "libx264", "-preset", "fast", "-c:a", "aac", "-b:a", "128k"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_target_extension() -> String {
    "mp4".to_string()
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            preset_args: default_preset_args(),
            target_extension: default_target_extension(),
        }
    }
}

/// External tool configuration: transcoder and probe executables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Transcoder executable (ambient search-path name or absolute path).
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Duration probe executable.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    /// Optional directory holding bundled binaries; when unset the running
    /// executable's directory is probed instead.
    #[serde(default)]
    pub bundle_dir: Option<PathBuf>,
    /// Timeout for the duration probe, in seconds.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    8
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            bundle_dir: None,
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Maximum concurrent conversions (0 = number of logical CPUs).
    #[serde(default)]
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { capacity: 0 }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VID2MP4_FFMPEG -> tools.ffmpeg
    /// - VID2MP4_FFPROBE -> tools.ffprobe
    /// - VID2MP4_POOL_CAPACITY -> pool.capacity
    /// - VID2MP4_PROBE_TIMEOUT_SECS -> tools.probe_timeout_secs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VID2MP4_FFMPEG") {
            if !val.is_empty() {
                self.tools.ffmpeg = val;
            }
        }

        if let Ok(val) = env::var("VID2MP4_FFPROBE") {
            if !val.is_empty() {
                self.tools.ffprobe = val;
            }
        }

        if let Ok(val) = env::var("VID2MP4_POOL_CAPACITY") {
            if let Ok(capacity) = val.parse::<usize>() {
                self.pool.capacity = capacity;
            }
        }

        if let Ok(val) = env::var("VID2MP4_PROBE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.tools.probe_timeout_secs = secs;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
