pub mod error;
pub mod measurement;
pub mod record;

pub use error::{BenchError, BenchResult};
pub use measurement::{
    BenchmarkReport, CorpusInfo, DedupCounts, Measurement, Outcome, Phase, SampleInfo, SubjectId,
    UNKNOWN_RSS_MB,
};
pub use record::{Metadata, Record, Source};
