//! Result extractors: each subject's output contract, isolated.
//!
//! Subjects print extraneous lines; an extractor keeps only lines carrying
//! its sentinel token. Returning `None` means the marker was not found and
//! the caller falls back to outer wall time.

use caret_bench_core::DedupCounts;

use crate::process::ProcessOutput;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extracted {
    /// Internally measured duration. `None` means the outer wall time is the value.
    pub seconds: Option<f64>,
    pub counts: Option<DedupCounts>,
    pub rows: Option<u64>,
}

pub trait ResultExtractor: Send + Sync {
    /// The stable token this extractor keys on.
    fn token(&self) -> &str;

    fn extract(&self, output: &ProcessOutput) -> Option<Extracted>;
}

/// What the number right after the prefix means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerValue {
    Seconds,
    Rows,
}

/// `PREFIX<number> key=value ...`, e.g. `DEDUP=0.412 before=50000 after=40123`.
/// Read from stdout; the last matching line wins.
pub struct PrefixMarker {
    pub prefix: &'static str,
    pub value: MarkerValue,
}

impl PrefixMarker {
    pub fn seconds(prefix: &'static str) -> Self {
        Self {
            prefix,
            value: MarkerValue::Seconds,
        }
    }

    pub fn rows(prefix: &'static str) -> Self {
        Self {
            prefix,
            value: MarkerValue::Rows,
        }
    }

    fn parse_line(&self, rest: &str) -> Option<Extracted> {
        let mut fields = rest.split_whitespace();
        let head = fields.next()?;
        let mut out = Extracted::default();
        match self.value {
            MarkerValue::Seconds => out.seconds = Some(head.parse::<f64>().ok()?),
            MarkerValue::Rows => out.rows = Some(head.parse::<u64>().ok()?),
        }

        let (mut before, mut after) = (None, None);
        for field in fields {
            match field.split_once('=') {
                Some(("before", v)) => before = v.parse::<u64>().ok(),
                Some(("after", v)) => after = v.parse::<u64>().ok(),
                _ => {}
            }
        }
        if let (Some(before), Some(after)) = (before, after) {
            out.counts = Some(DedupCounts { before, after });
        }
        Some(out)
    }
}

impl ResultExtractor for PrefixMarker {
    fn token(&self) -> &str {
        self.prefix
    }

    fn extract(&self, output: &ProcessOutput) -> Option<Extracted> {
        output
            .stdout
            .lines()
            .filter_map(|l| l.trim().strip_prefix(self.prefix))
            .filter_map(|rest| self.parse_line(rest))
            .last()
    }
}

/// caret's `Loaded N lines` diagnostic. Carries no value: it only confirms
/// the file was mapped, and process wall time is the measurement.
pub struct LoadedMarker;

impl ResultExtractor for LoadedMarker {
    fn token(&self) -> &str {
        "Loaded"
    }

    fn extract(&self, output: &ProcessOutput) -> Option<Extracted> {
        output
            .stderr
            .lines()
            .any(|l| l.contains(self.token()))
            .then(Extracted::default)
    }
}

/// caret's dedup summary:
/// `2000 total | 1600 unique | 400 duplicates (20.0%) | 125.0ms | strategy: exact`.
pub struct DedupSummary;

impl DedupSummary {
    fn parse_line(line: &str) -> Option<Extracted> {
        let mut parts = line.split('|').map(str::trim);
        let total = parts.next()?.strip_suffix("total")?.trim().parse::<u64>().ok()?;
        let unique = parts.next()?.strip_suffix("unique")?.trim().parse::<u64>().ok()?;
        let _duplicates = parts.next()?;
        let ms = parts.next()?.strip_suffix("ms")?.trim().parse::<f64>().ok()?;
        Some(Extracted {
            seconds: Some(ms / 1000.0),
            counts: Some(DedupCounts {
                before: total,
                after: unique,
            }),
            rows: Some(total),
        })
    }
}

impl ResultExtractor for DedupSummary {
    fn token(&self) -> &str {
        "unique |"
    }

    fn extract(&self, output: &ProcessOutput) -> Option<Extracted> {
        output
            .stderr
            .lines()
            .chain(output.stdout.lines())
            .filter(|l| l.contains(self.token()))
            .filter_map(|l| {
                // Tolerate a decorated prefix such as "✓ Dedup: ".
                let start = l.find(|c: char| c.is_ascii_digit())?;
                Self::parse_line(&l[start..])
            })
            .last()
    }
}
