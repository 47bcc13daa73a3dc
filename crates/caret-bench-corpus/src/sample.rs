use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use caret_bench_core::{BenchResult, CorpusInfo};

/// Baselines would run out of memory on the full corpus; they dedup this many lines.
pub const DEFAULT_SAMPLE_LINES: u64 = 50_000;

/// Transient prefix of the corpus. The file is removed when this is dropped,
/// including when creation fails half-way.
#[derive(Debug)]
pub struct SampleCorpus {
    path: PathBuf,
    lines: u64,
}

impl SampleCorpus {
    /// Copy the first `max_lines` lines of `source` byte-for-byte into `dest`.
    pub fn create(source: &Path, dest: PathBuf, max_lines: u64) -> BenchResult<Self> {
        let mut sample = Self {
            path: dest,
            lines: 0,
        };

        let mut reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(File::create(&sample.path)?);
        let mut line = Vec::new();
        while sample.lines < max_lines {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            writer.write_all(&line)?;
            sample.lines += 1;
        }
        writer.flush()?;

        debug!(path = %sample.path.display(), lines = sample.lines, "sample corpus created");
        Ok(sample)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }
}

impl Drop for SampleCorpus {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "sample corpus removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "cannot remove sample corpus: {e}"),
        }
    }
}

/// `<corpus>.dedup_sample.jsonl`, next to the corpus.
pub fn sample_path_for(corpus: &Path) -> PathBuf {
    let mut name = corpus.as_os_str().to_owned();
    name.push(".dedup_sample.jsonl");
    PathBuf::from(name)
}

/// Size and line count of an existing corpus.
pub fn scan_corpus(path: &Path) -> BenchResult<CorpusInfo> {
    let bytes = std::fs::metadata(path)?.len();
    let mut reader = BufReader::with_capacity(1 << 20, File::open(path)?);
    let mut buf = vec![0u8; 1 << 20];
    let mut lines = 0u64;
    let mut last = b'\n';
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = buf[n - 1];
    }
    if last != b'\n' {
        lines += 1;
    }
    Ok(CorpusInfo {
        path: path.to_path_buf(),
        bytes,
        lines,
    })
}
