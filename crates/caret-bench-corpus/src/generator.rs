//! Synthetic JSONL corpus with a controlled share of exact duplicates.
//!
//! Duplicates reuse a (prompt, response) pair drawn straight from the
//! vocabulary, so they are byte-identical on both fields. Every other record
//! appends a random lowercase suffix to both fields and practically never
//! collides. Metadata is resampled for every record, duplicates included.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use caret_bench_core::{BenchResult, Metadata, Record, Source};

pub const DEFAULT_DUPLICATE_RATIO: f64 = 0.2;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 500_000;

const WRITE_BUFFER: usize = 1 << 20;
const MB: f64 = 1024.0 * 1024.0;

pub const PROMPTS: &[&str] = &[
    "Explain quantum computing in simple terms.",
    "Write a Python function to sort a list.",
    "What is the meaning of life?",
    "How does photosynthesis work?",
    "Describe the theory of relativity.",
    "What are the benefits of exercise?",
    "Explain machine learning to a five-year-old.",
    "Write a haiku about programming.",
    "What is the Fibonacci sequence?",
    "How do neural networks learn?",
];

pub const RESPONSES: &[&str] = &[
    "Quantum computing uses qubits that can exist in superposition, \
     allowing parallel computation of multiple states simultaneously.",
    "def sort_list(lst): return sorted(lst)",
    "The meaning of life is a philosophical question with many answers.",
    "Photosynthesis converts CO2 and water into glucose using sunlight.",
    "Relativity shows that space and time are interconnected.",
    "Exercise improves cardiovascular health, mood, and longevity.",
    "Machine learning is when computers learn patterns from examples.",
    "Bits and bytes flow / Logic gates open and close / Software comes alive",
    "The Fibonacci sequence: each number is the sum of the two before it.",
    "Neural networks adjust weights through backpropagation to minimize loss.",
];

const PROMPT_SUFFIX: (usize, usize) = (20, 200);
const RESPONSE_SUFFIX: (usize, usize) = (50, 500);

/// Periodic generation snapshot. Purely informational.
#[derive(Debug, Clone)]
pub struct Progress {
    pub percent: f64,
    pub lines: u64,
    pub bytes: u64,
    pub mb_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct CorpusStats {
    pub lines: u64,
    pub bytes: u64,
    pub duplicates_injected: u64,
    pub elapsed: Duration,
}

pub struct CorpusGenerator<R> {
    rng: R,
    duplicate_ratio: f64,
    progress_interval: u64,
}

impl CorpusGenerator<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> CorpusGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            duplicate_ratio: DEFAULT_DUPLICATE_RATIO,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_duplicate_ratio(mut self, ratio: f64) -> Self {
        self.duplicate_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_progress_interval(mut self, every: u64) -> Self {
        self.progress_interval = every.max(1);
        self
    }

    /// Next record, and whether it is an injected duplicate.
    /// The first record of a corpus is never a duplicate.
    pub fn next_record(&mut self, first: bool) -> (Record, bool) {
        let duplicate = !first && self.rng.gen_bool(self.duplicate_ratio);
        let (prompt, response) = if duplicate {
            (
                self.pick(PROMPTS).to_string(),
                self.pick(RESPONSES).to_string(),
            )
        } else {
            let p = self.pick(PROMPTS);
            let r = self.pick(RESPONSES);
            (
                format!("{p} {}", self.suffix(PROMPT_SUFFIX)),
                format!("{r} {}", self.suffix(RESPONSE_SUFFIX)),
            )
        };

        let metadata = Metadata {
            source: *Source::ALL.choose(&mut self.rng).unwrap_or(&Source::Web),
            quality: (self.rng.gen_range(0.5..=1.0_f64) * 100.0).round() / 100.0,
            tokens: self.rng.gen_range(50..=2000),
        };

        (
            Record {
                prompt,
                response,
                metadata,
            },
            duplicate,
        )
    }

    /// Write records to `out` until at least `target_bytes` have been written.
    pub fn write<W: Write>(
        &mut self,
        mut out: W,
        target_bytes: u64,
        mut on_progress: impl FnMut(&Progress),
    ) -> BenchResult<CorpusStats> {
        let start = Instant::now();
        let mut line = Vec::with_capacity(1024);
        let mut bytes = 0u64;
        let mut lines = 0u64;
        let mut duplicates = 0u64;

        while bytes < target_bytes {
            let (record, duplicate) = self.next_record(lines == 0);
            line.clear();
            serde_json::to_writer(&mut line, &record)?;
            line.push(b'\n');
            out.write_all(&line)?;

            bytes += line.len() as u64;
            lines += 1;
            if duplicate {
                duplicates += 1;
            }

            if lines % self.progress_interval == 0 {
                let elapsed = start.elapsed().as_secs_f64();
                on_progress(&Progress {
                    percent: bytes as f64 / target_bytes as f64 * 100.0,
                    lines,
                    bytes,
                    mb_per_sec: if elapsed > 0.0 {
                        bytes as f64 / MB / elapsed
                    } else {
                        0.0
                    },
                });
            }
        }
        out.flush()?;

        let stats = CorpusStats {
            lines,
            bytes,
            duplicates_injected: duplicates,
            elapsed: start.elapsed(),
        };
        debug!(?stats, "corpus written");
        Ok(stats)
    }

    /// Generate a corpus file. A partial file is left behind on error.
    pub fn generate_file(
        &mut self,
        path: &Path,
        target_bytes: u64,
        on_progress: impl FnMut(&Progress),
    ) -> BenchResult<CorpusStats> {
        info!(path = %path.display(), target_bytes, "generating corpus");
        let file = File::create(path)?;
        self.write(
            BufWriter::with_capacity(WRITE_BUFFER, file),
            target_bytes,
            on_progress,
        )
    }

    fn pick(&mut self, vocab: &'static [&'static str]) -> &'static str {
        vocab.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn suffix(&mut self, (min, max): (usize, usize)) -> String {
        let len = self.rng.gen_range(min..=max);
        (0..len)
            .map(|_| char::from(b'a' + self.rng.gen_range(0..26u8)))
            .collect()
    }
}

/// Convert a size in GB (1024^3) to bytes.
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb.max(0.0) * 1024.0 * 1024.0 * 1024.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn generate(seed: u64, target: u64) -> (Vec<u8>, CorpusStats) {
        let mut buf = Vec::new();
        let stats = CorpusGenerator::seeded(seed)
            .write(&mut buf, target, |_| {})
            .unwrap();
        (buf, stats)
    }

    fn parse(buf: &[u8]) -> Vec<Record> {
        std::str::from_utf8(buf)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_size_within_one_record_of_target() {
        for target in [1u64, 4_096, 250_000, 1_000_000] {
            let (buf, stats) = generate(7, target);
            assert_eq!(stats.bytes, buf.len() as u64);
            assert!(stats.bytes >= target);
            let last = buf[..buf.len() - 1]
                .iter()
                .rposition(|&b| b == b'\n')
                .map(|i| buf.len() - i - 1)
                .unwrap_or(buf.len()) as u64;
            assert!(stats.bytes - target < last, "overshoot beyond one record");
        }
    }

    #[test]
    fn test_line_count_matches_stats() {
        let (buf, stats) = generate(11, 500_000);
        let records = parse(&buf);
        assert_eq!(records.len() as u64, stats.lines);
        let avg = stats.bytes as f64 / stats.lines as f64;
        assert!((stats.lines as f64 * avg - 500_000.0).abs() < avg * 3.0);
    }

    #[test]
    fn test_duplicate_share_near_ratio() {
        let mut gen = CorpusGenerator::seeded(42);
        let mut recs = Vec::new();
        let mut flagged = 0;
        for i in 0..2000 {
            let (rec, dup) = gen.next_record(i == 0);
            if dup {
                flagged += 1;
            }
            recs.push(rec);
        }
        // p = 0.2, n = 1999: mean 400, sd ~18
        assert!((340..=460).contains(&flagged), "flagged = {flagged}");

        let mut groups: HashMap<(&str, &str), usize> = HashMap::new();
        for r in &recs {
            *groups.entry(r.dedup_key()).or_default() += 1;
        }
        let paired: usize = groups.values().filter(|&&n| n >= 2).sum();
        assert!(paired >= 150, "paired = {paired}");
        assert!(groups.values().any(|&n| n >= 2));
    }

    #[test]
    fn test_first_record_never_duplicate() {
        for seed in 0..50 {
            let mut gen = CorpusGenerator::seeded(seed).with_duplicate_ratio(1.0);
            let (first, dup) = gen.next_record(true);
            assert!(!dup);
            assert!(first.prompt.len() > PROMPTS.iter().map(|p| p.len()).max().unwrap());
            let (_, dup) = gen.next_record(false);
            assert!(dup);
        }
    }

    #[test]
    fn test_duplicates_are_vocabulary_pairs() {
        let mut gen = CorpusGenerator::seeded(3).with_duplicate_ratio(1.0);
        gen.next_record(true);
        for _ in 0..100 {
            let (rec, _) = gen.next_record(false);
            assert!(PROMPTS.contains(&rec.prompt.as_str()));
            assert!(RESPONSES.contains(&rec.response.as_str()));
        }
    }

    #[test]
    fn test_metadata_ranges() {
        let (buf, _) = generate(5, 200_000);
        for rec in parse(&buf) {
            assert!((0.5..=1.0).contains(&rec.metadata.quality));
            assert!((50..=2000).contains(&rec.metadata.tokens));
            let scaled = rec.metadata.quality * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let (a, _) = generate(99, 50_000);
        let (b, _) = generate(99, 50_000);
        let (c, _) = generate(100, 50_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_progress_does_not_change_output() {
        let mut quiet = Vec::new();
        CorpusGenerator::seeded(8)
            .with_progress_interval(10)
            .write(&mut quiet, 100_000, |_| {})
            .unwrap();

        let mut chatty = Vec::new();
        let mut reports = Vec::new();
        CorpusGenerator::seeded(8)
            .with_progress_interval(10)
            .write(&mut chatty, 100_000, |p| reports.push(p.clone()))
            .unwrap();

        assert_eq!(quiet, chatty);
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0].lines < w[1].lines));
        assert!(reports.iter().all(|p| p.lines % 10 == 0));
    }

    #[test]
    fn test_generate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let stats = CorpusGenerator::seeded(1)
            .generate_file(&path, 64 * 1024, |_| {})
            .unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), stats.bytes);
    }

    #[test]
    fn test_gb_to_bytes() {
        assert_eq!(gb_to_bytes(1.0), 1 << 30);
        assert_eq!(gb_to_bytes(0.5), 1 << 29);
        assert_eq!(gb_to_bytes(-3.0), 0);
    }
}
