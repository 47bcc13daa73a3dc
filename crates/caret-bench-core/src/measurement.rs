use std::fmt;
use std::path::PathBuf;

/// Peak memory reported when the host has no profiling facility.
pub const UNKNOWN_RSS_MB: f64 = 0.0;

/// A benchmarked tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectId {
    Caret,
    Pandas,
    HfDatasets,
}

impl SubjectId {
    /// Report column order: target first, then the baselines.
    pub const ALL: [SubjectId; 3] = [Self::Caret, Self::Pandas, Self::HfDatasets];

    pub fn label(self) -> &'static str {
        match self {
            Self::Caret => "Caret",
            Self::Pandas => "Pandas",
            Self::HfDatasets => "HF Datasets",
        }
    }

    pub fn is_target(self) -> bool {
        matches!(self, Self::Caret)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caret => write!(f, "caret"),
            Self::Pandas => write!(f, "pandas"),
            Self::HfDatasets => write!(f, "hf-datasets"),
        }
    }
}

/// One of the three measured operations, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    FirstRecord,
    PeakMemory,
    Dedup,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Self::FirstRecord, Self::PeakMemory, Self::Dedup];

    pub fn label(self) -> &'static str {
        match self {
            Self::FirstRecord => "Time to First Line",
            Self::PeakMemory => "Peak Memory (RSS)",
            Self::Dedup => "Dedup Time",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstRecord => write!(f, "first-record"),
            Self::PeakMemory => write!(f, "peak-memory"),
            Self::Dedup => write!(f, "dedup"),
        }
    }
}

/// How a cell's value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Value taken from the subject's marker line, or from wall time where
    /// wall time is the intended measure.
    Measured,
    /// Marker line absent; outer wall time stands in.
    Fallback,
    /// Subject exited nonzero.
    Failed { exit_code: Option<i32> },
    TimedOut,
}

impl Outcome {
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Measured | Self::Fallback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupCounts {
    pub before: u64,
    pub after: u64,
}

impl DedupCounts {
    pub fn removed(&self) -> u64 {
        self.before.saturating_sub(self.after)
    }
}

/// Result of one (subject, phase) cell.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub subject: SubjectId,
    pub phase: Phase,
    /// Duration in seconds. `None` when the subject timed out.
    pub seconds: Option<f64>,
    /// Peak RSS in MB, or [`UNKNOWN_RSS_MB`].
    pub peak_rss_mb: f64,
    pub counts: Option<DedupCounts>,
    pub outcome: Outcome,
    /// Measured against the Sample Corpus rather than the full file.
    pub on_sample: bool,
}

impl Measurement {
    pub fn timed_out(subject: SubjectId, phase: Phase) -> Self {
        Self {
            subject,
            phase,
            seconds: None,
            peak_rss_mb: UNKNOWN_RSS_MB,
            counts: None,
            outcome: Outcome::TimedOut,
            on_sample: false,
        }
    }

    /// Duration, if the cell holds a usable one.
    pub fn duration(&self) -> Option<f64> {
        if self.outcome.is_usable() {
            self.seconds
        } else {
            None
        }
    }

    /// Peak memory, if the cell holds a usable one. Unknown memory is `Some(0.0)`.
    pub fn memory(&self) -> Option<f64> {
        if self.outcome.is_usable() {
            Some(self.peak_rss_mb)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorpusInfo {
    pub path: PathBuf,
    pub bytes: u64,
    pub lines: u64,
}

impl CorpusInfo {
    pub fn size_gb(&self) -> f64 {
        self.bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// What the two baseline duplicate definitions make of the Sample Corpus.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    pub lines: u64,
    pub field_tuple: DedupCounts,
    pub concat_hash: DedupCounts,
}

impl SampleInfo {
    pub fn definitions_diverge(&self) -> bool {
        self.field_tuple != self.concat_hash
    }
}

/// All measurements of one run. Built once by the orchestrator, then only read.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub run_id: String,
    pub corpus: CorpusInfo,
    pub sample: Option<SampleInfo>,
    pub measurements: Vec<Measurement>,
}

impl BenchmarkReport {
    pub fn get(&self, subject: SubjectId, phase: Phase) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|m| m.subject == subject && m.phase == phase)
    }
}
