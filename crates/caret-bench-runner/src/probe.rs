//! Peak-memory probes.
//!
//! A probe wraps the measured command in the host's profiling facility and
//! reads the peak RSS back out of its stderr. The probe is chosen once per
//! run by [`detect`]; call sites never branch on the platform themselves.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const TIME_BIN: &str = "/usr/bin/time";

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * 1024.0;

pub trait MemoryProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Command running `program args` under this probe.
    fn command(&self, program: &OsStr, args: &[OsString]) -> Command;

    /// Peak RSS in MB, if the probe's report line is in `stderr`.
    fn parse_peak_mb(&self, stderr: &str) -> Option<f64>;

    fn is_available(&self) -> bool {
        true
    }
}

/// GNU `time -v`: `Maximum resident set size (kbytes): 12345`.
pub struct GnuTime {
    program: PathBuf,
}

impl GnuTime {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MemoryProbe for GnuTime {
    fn name(&self) -> &str {
        "gnu-time"
    }

    fn command(&self, program: &OsStr, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-v").arg(program).args(args);
        cmd
    }

    fn parse_peak_mb(&self, stderr: &str) -> Option<f64> {
        parse_gnu_time(stderr)
    }
}

/// BSD/macOS `time -l`: `  12345678  maximum resident set size` in bytes.
pub struct BsdTime {
    program: PathBuf,
}

impl BsdTime {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MemoryProbe for BsdTime {
    fn name(&self) -> &str {
        "bsd-time"
    }

    fn command(&self, program: &OsStr, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-l").arg(program).args(args);
        cmd
    }

    fn parse_peak_mb(&self, stderr: &str) -> Option<f64> {
        parse_bsd_time(stderr)
    }
}

/// No profiling facility: run the command directly, memory stays unknown.
pub struct NoProbe;

impl MemoryProbe for NoProbe {
    fn name(&self) -> &str {
        "none"
    }

    fn command(&self, program: &OsStr, args: &[OsString]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }

    fn parse_peak_mb(&self, _stderr: &str) -> Option<f64> {
        None
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Pick the probe for this host.
pub fn detect() -> Box<dyn MemoryProbe> {
    detect_at(Path::new(TIME_BIN))
}

pub fn detect_at(time_bin: &Path) -> Box<dyn MemoryProbe> {
    if !time_bin.exists() {
        tracing::warn!(
            "{} not found, peak memory will be reported as N/A",
            time_bin.display()
        );
        return Box::new(NoProbe);
    }
    if cfg!(target_os = "macos") {
        Box::new(BsdTime::new(time_bin))
    } else {
        Box::new(GnuTime::new(time_bin))
    }
}

pub fn parse_gnu_time(stderr: &str) -> Option<f64> {
    stderr
        .lines()
        .filter(|l| l.contains("Maximum resident set size"))
        .filter_map(|l| l.split_whitespace().last()?.parse::<u64>().ok())
        .last()
        .map(|kb| kb as f64 / KB)
}

pub fn parse_bsd_time(stderr: &str) -> Option<f64> {
    stderr
        .lines()
        .filter(|l| l.contains("maximum resident set size"))
        .filter_map(|l| l.split_whitespace().next()?.parse::<u64>().ok())
        .last()
        .map(|bytes| bytes as f64 / MB)
}
