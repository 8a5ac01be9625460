//! Sandbox configuration.
//!
//! Configuration is layered: defaults, then an optional JSON file, then
//! `SANDFRAME_*` environment variables. Command-line flags are applied on top
//! by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Environment variable overriding the worker binary location.
pub const WORKER_PATH_ENV: &str = "SANDFRAME_WORKER_PATH";

/// Environment variable overriding the default timeout (seconds).
pub const TIMEOUT_ENV: &str = "SANDFRAME_TIMEOUT_SECS";

/// Deadline for a single execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy(Duration);

impl TimeoutPolicy {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Negative and NaN inputs become zero, values too large for a
    /// [`Duration`] become [`Duration::MAX`].
    pub fn from_secs_f64(secs: f64) -> Self {
        Self(Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX))
    }

    pub fn duration(self) -> Duration {
        self.0
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for TimeoutPolicy {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

/// How chart outputs are delivered.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChartOutput {
    /// Self-contained SVG markup.
    #[default]
    Markup,
    /// PNG raster image.
    Raster,
}

/// Settings for a [`Sandbox`](crate::sandbox::Sandbox).
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Explicit worker binary path. Discovered when unset.
    pub worker_path: Option<PathBuf>,
    /// Deadline used when a request does not supply one.
    pub default_timeout_secs: f64,
    /// How long to wait for a worker to exit on its own before killing it.
    pub reap_grace_ms: u64,
    /// Address-space limit applied inside the worker.
    pub memory_limit_mb: Option<u64>,
    /// Rewrite styled-heatmap scripts into the canonical heatmap program.
    pub normalize_styled_heatmaps: bool,
    /// Chart delivery format.
    pub chart_output: ChartOutput,
    /// Ceiling on simultaneously running workers. Unbounded when unset.
    pub max_concurrent_workers: Option<usize>,
    /// Let worker stderr pass through to ours.
    pub forward_worker_logs: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            worker_path: None,
            default_timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            reap_grace_ms: 2000,
            memory_limit_mb: Some(1024),
            normalize_styled_heatmaps: true,
            chart_output: ChartOutput::Markup,
            max_concurrent_workers: None,
            forward_worker_logs: true,
        }
    }
}

impl SandboxConfig {
    /// Load a config file (JSON). Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `SANDFRAME_WORKER_PATH` and `SANDFRAME_TIMEOUT_SECS`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            if !path.is_empty() {
                self.worker_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(secs) = std::env::var(TIMEOUT_ENV) {
            self.default_timeout_secs = parse_timeout_secs(&secs)?;
        }
        Ok(self)
    }

    pub fn with_worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    pub fn with_chart_output(mut self, output: ChartOutput) -> Self {
        self.chart_output = output;
        self
    }

    pub fn default_timeout(&self) -> TimeoutPolicy {
        TimeoutPolicy::from_secs_f64(self.default_timeout_secs)
    }

    pub fn reap_grace(&self) -> Duration {
        Duration::from_millis(self.reap_grace_ms)
    }
}

fn parse_timeout_secs(text: &str) -> Result<f64> {
    match text.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(secs),
        _ => Err(Error::Config(format!(
            "{} must be a positive number of seconds, got '{}'",
            TIMEOUT_ENV, text
        ))),
    }
}

/// Options forwarded to the worker alongside each script.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct WorkerOptions {
    pub normalize_styled_heatmaps: bool,
    pub chart_output: ChartOutput,
    /// `RLIMIT_AS` in bytes.
    pub memory_limit_bytes: Option<u64>,
    /// `RLIMIT_CPU` in seconds.
    pub cpu_limit_secs: Option<u64>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            normalize_styled_heatmaps: true,
            chart_output: ChartOutput::Markup,
            memory_limit_bytes: None,
            cpu_limit_secs: None,
        }
    }
}

impl WorkerOptions {
    /// Derive worker options for one request.
    ///
    /// The CPU limit trails the wall-clock deadline so the supervisor normally
    /// acts first.
    pub fn for_request(config: &SandboxConfig, timeout: TimeoutPolicy) -> Self {
        let deadline = timeout.duration();
        let whole_secs = deadline
            .as_secs()
            .saturating_add(u64::from(deadline.subsec_nanos() > 0));
        Self {
            normalize_styled_heatmaps: config.normalize_styled_heatmaps,
            chart_output: config.chart_output,
            memory_limit_bytes: config.memory_limit_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
            cpu_limit_secs: Some(whole_secs.saturating_add(2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_timeout(), TimeoutPolicy::new(Duration::from_secs(15)));
        assert_eq!(config.chart_output, ChartOutput::Markup);
        assert!(config.normalize_styled_heatmaps);
        assert!(config.max_concurrent_workers.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sandframe.json");
        std::fs::write(&path, r#"{"default_timeout_secs": 3, "chart_output": "raster"}"#).unwrap();

        let config = SandboxConfig::from_file(&path).unwrap();
        assert_eq!(config.default_timeout_secs, 3.0);
        assert_eq!(config.chart_output, ChartOutput::Raster);
        assert_eq!(config.reap_grace_ms, 2000);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(SandboxConfig::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_timeout_secs() {
        assert_eq!(parse_timeout_secs("2.5").unwrap(), 2.5);
        assert!(parse_timeout_secs("0").is_err());
        assert!(parse_timeout_secs("soon").is_err());
    }

    #[test]
    fn test_worker_options_cpu_limit_trails_deadline() {
        let options = WorkerOptions::for_request(
            &SandboxConfig::default(),
            TimeoutPolicy::from_secs_f64(1.5),
        );
        assert_eq!(options.cpu_limit_secs, Some(4));
        assert_eq!(options.memory_limit_bytes, Some(1024 * 1024 * 1024));
    }

    #[test]
    fn test_unbounded_timeouts_do_not_overflow() {
        let options = WorkerOptions::for_request(
            &SandboxConfig::default(),
            TimeoutPolicy::new(Duration::MAX),
        );
        assert_eq!(options.cpu_limit_secs, Some(u64::MAX));

        assert_eq!(TimeoutPolicy::from_secs_f64(f64::INFINITY).duration(), Duration::MAX);
        assert_eq!(TimeoutPolicy::from_secs_f64(1e300).duration(), Duration::MAX);
        assert_eq!(TimeoutPolicy::from_secs_f64(f64::NAN).duration(), Duration::ZERO);
        assert_eq!(TimeoutPolicy::from_secs_f64(-1.0).duration(), Duration::ZERO);
    }
}
