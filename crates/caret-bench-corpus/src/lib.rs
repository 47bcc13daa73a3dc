//! Benchmark corpus: generation, reduced samples, and the reference
//! deduplication used to cross-check baseline counts.

pub mod dedup;
pub mod generator;
pub mod sample;

pub use dedup::{count_unique, count_unique_records, DedupKey};
pub use generator::{gb_to_bytes, CorpusGenerator, CorpusStats, Progress};
pub use sample::{sample_path_for, scan_corpus, SampleCorpus, DEFAULT_SAMPLE_LINES};
