//! Reference implementations of the two baseline duplicate definitions.
//!
//! pandas drops rows whose `(prompt, response)` tuple was already seen.
//! The datasets script hashes `prompt + response` and drops repeated
//! digests, so `("ab", "c")` and `("a", "bc")` collide there but not in
//! pandas. Running both over the same file shows when the baselines are
//! not counting the same thing.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};

use caret_bench_core::{BenchError, BenchResult, DedupCounts, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// Exact equality on the `(prompt, response)` pair.
    FieldTuple,
    /// Equality of a digest over the concatenated fields.
    ConcatHash,
}

impl DedupKey {
    pub fn label(self) -> &'static str {
        match self {
            Self::FieldTuple => "field-tuple equality",
            Self::ConcatHash => "hash of prompt+response",
        }
    }
}

#[derive(Default)]
struct Seen {
    tuples: HashSet<(String, String)>,
    digests: HashSet<[u8; 32]>,
}

impl Seen {
    /// Returns true the first time a key is seen.
    fn insert(&mut self, key: DedupKey, record: &Record) -> bool {
        match key {
            DedupKey::FieldTuple => self
                .tuples
                .insert((record.prompt.clone(), record.response.clone())),
            DedupKey::ConcatHash => {
                let mut hasher = Sha256::new();
                hasher.update(record.prompt.as_bytes());
                hasher.update(record.response.as_bytes());
                self.digests.insert(hasher.finalize().into())
            }
        }
    }
}

pub fn count_unique_records<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    key: DedupKey,
) -> DedupCounts {
    let mut seen = Seen::default();
    let mut counts = DedupCounts {
        before: 0,
        after: 0,
    };
    for record in records {
        counts.before += 1;
        if seen.insert(key, record) {
            counts.after += 1;
        }
    }
    counts
}

/// Before/after record counts for a JSONL file. Blank lines are skipped;
/// a malformed line is a parse error.
pub fn count_unique(path: &Path, key: DedupKey) -> BenchResult<DedupCounts> {
    let reader = BufReader::new(File::open(path)?);
    let mut seen = Seen::default();
    let mut counts = DedupCounts {
        before: 0,
        after: 0,
    };

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .map_err(|e| BenchError::Parse(format!("{}:{}: {e}", path.display(), i + 1)))?;
        counts.before += 1;
        if seen.insert(key, &record) {
            counts.after += 1;
        }
    }
    Ok(counts)
}
