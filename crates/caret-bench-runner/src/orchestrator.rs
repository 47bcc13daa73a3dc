//! Benchmark orchestration.
//!
//! Phases run strictly in order (first record, memory, dedup) and subjects
//! one at a time, so no two measured processes ever overlap. The dedup phase
//! owns the Sample Corpus: it is created right before the sampled subjects
//! run and removed right after, whatever happened in between.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use caret_bench_core::{
    BenchError, BenchResult, BenchmarkReport, CorpusInfo, Measurement, Outcome, Phase,
    SampleInfo, SubjectId,
};
use caret_bench_corpus::{count_unique, sample_path_for, DedupKey, SampleCorpus};

use crate::process::ResourceMeter;
use crate::subjects::Subject;

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub first_record: Duration,
    pub memory: Duration,
    pub dedup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            first_record: Duration::from_secs(300),
            memory: Duration::from_secs(600),
            dedup: Duration::from_secs(600),
        }
    }
}

impl Timeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::FirstRecord => self.first_record,
            Phase::PeakMemory => self.memory,
            Phase::Dedup => self.dedup,
        }
    }
}

/// Progress notifications for whoever drives the run.
#[derive(Debug)]
pub enum RunEvent<'a> {
    PhaseStarted { index: usize, phase: Phase },
    SampleCreated { path: &'a Path, lines: u64 },
    SubjectStarted { subject: SubjectId, phase: Phase, on_sample: bool },
    SubjectFinished(&'a Measurement),
    SampleRemoved { path: &'a Path },
}

pub struct Orchestrator<'a> {
    meter: ResourceMeter,
    subjects: Vec<Box<dyn Subject + 'a>>,
    timeouts: Timeouts,
    sample_lines: u64,
    sample_path: Option<PathBuf>,
    observer: Box<dyn Fn(&RunEvent<'_>) + 'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(meter: ResourceMeter, subjects: Vec<Box<dyn Subject + 'a>>) -> Self {
        Self {
            meter,
            subjects,
            timeouts: Timeouts::default(),
            sample_lines: caret_bench_corpus::DEFAULT_SAMPLE_LINES,
            sample_path: None,
            observer: Box::new(|_| {}),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_sample_lines(mut self, lines: u64) -> Self {
        self.sample_lines = lines.max(1);
        self
    }

    /// Override where the Sample Corpus is written. Defaults to next to the corpus.
    pub fn with_sample_path(mut self, path: PathBuf) -> Self {
        self.sample_path = Some(path);
        self
    }

    pub fn with_observer(mut self, observer: impl Fn(&RunEvent<'_>) + 'a) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn sample_lines(&self) -> u64 {
        self.sample_lines
    }

    /// Verify every subject can run. The first failure aborts.
    pub fn check_environment(&self) -> BenchResult<()> {
        for subject in &self.subjects {
            subject.check()?;
        }
        Ok(())
    }

    pub fn run(&self, corpus: CorpusInfo) -> BenchmarkReport {
        let run_id = ulid::Ulid::new().to_string();
        let span = info_span!("run", run_id = %run_id);
        let _enter = span.enter();
        info!(corpus = %corpus.path.display(), lines = corpus.lines, "benchmark started");

        let mut measurements = Vec::with_capacity(self.subjects.len() * Phase::ALL.len());
        let mut sample = None;
        for (index, phase) in Phase::ALL.into_iter().enumerate() {
            (self.observer)(&RunEvent::PhaseStarted { index, phase });
            match phase {
                Phase::Dedup => {
                    let (cells, info) = self.run_dedup_phase(&corpus.path);
                    measurements.extend(cells);
                    sample = info;
                }
                _ => {
                    for subject in &self.subjects {
                        measurements.push(self.measure(subject.as_ref(), phase, &corpus.path, false));
                    }
                }
            }
        }

        info!("benchmark finished");
        BenchmarkReport {
            run_id,
            corpus,
            sample,
            measurements,
        }
    }

    fn run_dedup_phase(&self, corpus: &Path) -> (Vec<Measurement>, Option<SampleInfo>) {
        let mut cells = Vec::with_capacity(self.subjects.len());

        for subject in self.subjects.iter().filter(|s| !s.dedups_sample()) {
            cells.push(self.measure(subject.as_ref(), Phase::Dedup, corpus, false));
        }

        let sampled: Vec<_> = self.subjects.iter().filter(|s| s.dedups_sample()).collect();
        if sampled.is_empty() {
            return (cells, None);
        }

        let dest = self
            .sample_path
            .clone()
            .unwrap_or_else(|| sample_path_for(corpus));
        let sample = match SampleCorpus::create(corpus, dest, self.sample_lines) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("cannot create dedup sample: {e}");
                for subject in sampled {
                    cells.push(failed(subject.id(), Phase::Dedup, true));
                }
                return (cells, None);
            }
        };
        (self.observer)(&RunEvent::SampleCreated {
            path: sample.path(),
            lines: sample.lines(),
        });

        for subject in sampled {
            cells.push(self.measure(subject.as_ref(), Phase::Dedup, sample.path(), true));
        }
        let info = reference_counts(&sample);

        let path = sample.path().to_path_buf();
        drop(sample);
        (self.observer)(&RunEvent::SampleRemoved { path: &path });

        (cells, info)
    }

    /// Measure one cell. Never fails: problems are recorded in the outcome.
    fn measure(
        &self,
        subject: &dyn Subject,
        phase: Phase,
        corpus: &Path,
        on_sample: bool,
    ) -> Measurement {
        let id = subject.id();
        (self.observer)(&RunEvent::SubjectStarted {
            subject: id,
            phase,
            on_sample,
        });

        let invocation = subject.invocation(phase, corpus);
        let result = self.meter.run(
            &invocation.program,
            &invocation.args,
            self.timeouts.for_phase(phase),
        );

        let measurement = match result {
            Ok(output) => {
                let extracted = invocation.extractor.extract(&output);
                if let Some(rows) = extracted.as_ref().and_then(|e| e.rows) {
                    debug!(subject = %id, %phase, rows, "rows reported");
                }
                let outcome = if !output.success {
                    warn!(
                        subject = %id,
                        %phase,
                        code = ?output.exit_code,
                        stderr = %tail(&output.stderr),
                        "subject exited unsuccessfully"
                    );
                    Outcome::Failed {
                        exit_code: output.exit_code,
                    }
                } else if extracted.is_some() {
                    Outcome::Measured
                } else {
                    warn!(
                        subject = %id,
                        %phase,
                        token = invocation.extractor.token(),
                        "marker not found, using wall time"
                    );
                    Outcome::Fallback
                };
                let extracted = extracted.unwrap_or_default();
                Measurement {
                    subject: id,
                    phase,
                    seconds: Some(extracted.seconds.unwrap_or(output.wall_secs)),
                    peak_rss_mb: output.peak_rss_mb,
                    counts: extracted.counts,
                    outcome,
                    on_sample,
                }
            }
            Err(BenchError::Timeout { .. }) => {
                let mut m = Measurement::timed_out(id, phase);
                m.on_sample = on_sample;
                m
            }
            Err(e) if e.is_fatal() => {
                error!(subject = %id, %phase, "cannot run subject: {e}");
                failed(id, phase, on_sample)
            }
            Err(e) => {
                warn!(subject = %id, %phase, "measurement failed: {e}");
                failed(id, phase, on_sample)
            }
        };

        (self.observer)(&RunEvent::SubjectFinished(&measurement));
        measurement
    }
}

fn failed(subject: SubjectId, phase: Phase, on_sample: bool) -> Measurement {
    Measurement {
        subject,
        phase,
        seconds: None,
        peak_rss_mb: caret_bench_core::UNKNOWN_RSS_MB,
        counts: None,
        outcome: Outcome::Failed { exit_code: None },
        on_sample,
    }
}

/// Before/after counts of both baseline duplicate definitions over the sample.
fn reference_counts(sample: &SampleCorpus) -> Option<SampleInfo> {
    let field_tuple = count_unique(sample.path(), DedupKey::FieldTuple);
    let concat_hash = count_unique(sample.path(), DedupKey::ConcatHash);
    match (field_tuple, concat_hash) {
        (Ok(field_tuple), Ok(concat_hash)) => Some(SampleInfo {
            lines: sample.lines(),
            field_tuple,
            concat_hash,
        }),
        (Err(e), _) | (_, Err(e)) => {
            warn!("reference dedup over sample failed: {e}");
            None
        }
    }
}

fn tail(s: &str) -> String {
    let lines: Vec<&str> = s.lines().rev().take(3).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join(" | ")
}
