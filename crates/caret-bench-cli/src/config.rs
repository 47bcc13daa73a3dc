//! Configuration loading from TOML files.
//!
//! Lookup order:
//! 1. `--config <path>` on the command line
//! 2. `$CARET_BENCH_CONFIG` environment variable
//! 3. `<config dir>/caret-bench/config.toml`
//! 4. Built-in defaults (everything is optional)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use caret_bench_corpus::generator::{DEFAULT_DUPLICATE_RATIO, DEFAULT_PROGRESS_INTERVAL};
use caret_bench_corpus::DEFAULT_SAMPLE_LINES;
use caret_bench_runner::subjects::{DEFAULT_BUILD_COMMAND, DEFAULT_CARET_BIN};
use caret_bench_runner::{Timeouts, DEFAULT_PYTHON};

const ENV_VAR: &str = "CARET_BENCH_CONFIG";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub timeouts: TimeoutConfig,
    pub baselines: BaselineConfig,
    pub target: TargetConfig,
}

/// Corpus generation and sampling.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Probability that a record is an injected duplicate.
    pub duplicate_ratio: f64,
    /// Lines copied into the sample the baselines dedup.
    pub sample_lines: u64,
    /// Records between progress lines.
    pub progress_interval: u64,
    /// Fixed RNG seed. Unset means a fresh corpus every run.
    pub seed: Option<u64>,
}

/// Per-invocation bounds, in seconds.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub first_record_secs: u64,
    pub memory_secs: u64,
    pub dedup_secs: u64,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub python: String,
    /// Modules that must import before the run starts.
    pub required_modules: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub bin: PathBuf,
    /// Run when the binary is missing. Empty disables building.
    pub build_command: Vec<String>,
}

// --- Defaults ---

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            duplicate_ratio: DEFAULT_DUPLICATE_RATIO,
            sample_lines: DEFAULT_SAMPLE_LINES,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            seed: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let t = Timeouts::default();
        Self {
            first_record_secs: t.first_record.as_secs(),
            memory_secs: t.memory.as_secs(),
            dedup_secs: t.dedup.as_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            first_record: Duration::from_secs(self.first_record_secs),
            memory: Duration::from_secs(self.memory_secs),
            dedup: Duration::from_secs(self.dedup_secs),
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            python: DEFAULT_PYTHON.into(),
            required_modules: vec!["pandas".into(), "datasets".into()],
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            bin: PathBuf::from(DEFAULT_CARET_BIN),
            build_command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.corpus.duplicate_ratio) {
            bail!(
                "corpus.duplicate_ratio must be between 0 and 1, got {}",
                self.corpus.duplicate_ratio
            );
        }
        if self.corpus.sample_lines == 0 {
            bail!("corpus.sample_lines must be at least 1");
        }
        let t = &self.timeouts;
        if t.first_record_secs == 0 || t.memory_secs == 0 || t.dedup_secs == 0 {
            bail!("timeouts must be at least 1 second");
        }
        Ok(())
    }
}

/// Load config from disk. Returns defaults if no config file exists.
/// An explicit path that does not exist is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(p) = explicit {
        if !p.exists() {
            bail!("config file {} does not exist", p.display());
        }
    }

    if let Some(p) = config_path(explicit) {
        if p.exists() {
            let config = read_config(&p)?;
            tracing::debug!(path = %p.display(), "config loaded");
            return Ok(config);
        }
    }

    Ok(Config::default())
}

fn read_config(p: &Path) -> Result<Config> {
    let content =
        std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {}", p.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", p.display()))?;
    Ok(config)
}

/// Resolve the config file path.
fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    if let Ok(p) = std::env::var(ENV_VAR) {
        return Some(PathBuf::from(p));
    }

    directories::ProjectDirs::from("dev", "caret", "caret-bench")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Show the active config path (for `caret-bench config`).
pub fn show_config_path(explicit: Option<&Path>) -> String {
    match config_path(explicit) {
        Some(p) if p.exists() => format!("{} (loaded)", p.display()),
        Some(p) => format!("{} (not found, using defaults)", p.display()),
        None => "no config path resolved (using defaults)".into(),
    }
}
