//! Subject adapters: how each benchmarked tool is invoked for each phase and
//! how its output is read back.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use caret_bench_core::{BenchError, BenchResult, Phase, SubjectId};

use crate::extract::{DedupSummary, LoadedMarker, PrefixMarker, ResultExtractor};

/// One process to run for one (subject, phase) cell.
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub extractor: Box<dyn ResultExtractor>,
}

pub trait Subject {
    fn id(&self) -> SubjectId;

    /// Whether the dedup phase runs against the Sample Corpus.
    fn dedups_sample(&self) -> bool;

    /// Fail with an actionable [`BenchError::Environment`] if the tool cannot run.
    fn check(&self) -> BenchResult<()>;

    fn invocation(&self, phase: Phase, corpus: &Path) -> Invocation;
}

// ---------------------------------------------------------------------------
// Target tool
// ---------------------------------------------------------------------------

pub const DEFAULT_CARET_BIN: &str = "./target/release/caret";
pub const DEFAULT_BUILD_COMMAND: &[&str] = &["cargo", "build", "--release"];

pub struct Caret {
    bin: PathBuf,
    build_command: Vec<String>,
}

impl Caret {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            build_command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_build_command(mut self, command: Vec<String>) -> Self {
        self.build_command = command;
        self
    }

    fn build_hint(&self) -> String {
        format!("Build with: {}", self.build_command.join(" "))
    }

    /// Build the binary from source when it is missing and a toolchain is present.
    fn build(&self) -> BenchResult<()> {
        let Some((program, args)) = self.build_command.split_first() else {
            return Err(BenchError::environment(
                format!("caret binary not found at {}", self.bin.display()),
                "Set [target] build_command or pass --caret-bin",
            ));
        };
        if !command_succeeds(program, &["--version"]) {
            return Err(BenchError::environment(
                format!(
                    "caret binary not found at {} and '{program}' is not available to build it",
                    self.bin.display()
                ),
                "Install Rust from https://rustup.rs, then: cargo build --release",
            ));
        }

        info!(command = %self.build_command.join(" "), "building caret");
        eprintln!(
            "Caret binary not found at {}, building...",
            self.bin.display()
        );
        let status = Command::new(program).args(args).status()?;
        if !status.success() {
            return Err(BenchError::environment(
                format!("'{}' failed with {status}", self.build_command.join(" ")),
                self.build_hint(),
            ));
        }
        Ok(())
    }
}

impl Subject for Caret {
    fn id(&self) -> SubjectId {
        SubjectId::Caret
    }

    fn dedups_sample(&self) -> bool {
        false
    }

    fn check(&self) -> BenchResult<()> {
        if self.bin.exists() {
            return Ok(());
        }
        self.build()?;
        if self.bin.exists() {
            Ok(())
        } else {
            Err(BenchError::environment(
                format!("could not find caret binary at {}", self.bin.display()),
                self.build_hint(),
            ))
        }
    }

    fn invocation(&self, phase: Phase, corpus: &Path) -> Invocation {
        let extractor: Box<dyn ResultExtractor> = match phase {
            Phase::FirstRecord | Phase::PeakMemory => Box::new(LoadedMarker),
            Phase::Dedup => Box::new(DedupSummary),
        };
        Invocation {
            program: self.bin.clone().into_os_string(),
            args: vec![corpus.as_os_str().to_owned(), "--dedup".into()],
            extractor,
        }
    }
}

// ---------------------------------------------------------------------------
// Python baselines
// ---------------------------------------------------------------------------

pub const DEFAULT_PYTHON: &str = "python3";

/// A Python library driven through a generated `python -c` script.
/// Scripts print `TTFL=`, `ROWS=` or `DEDUP=` marker lines on stdout.
pub struct PythonBaseline {
    id: SubjectId,
    python: OsString,
    module: &'static str,
    package: &'static str,
}

impl PythonBaseline {
    pub fn pandas(python: impl Into<OsString>) -> Self {
        Self {
            id: SubjectId::Pandas,
            python: python.into(),
            module: "pandas",
            package: "pandas",
        }
    }

    pub fn hf_datasets(python: impl Into<OsString>) -> Self {
        Self {
            id: SubjectId::HfDatasets,
            python: python.into(),
            module: "datasets",
            package: "datasets",
        }
    }

    pub fn script(&self, phase: Phase, corpus: &Path) -> String {
        let path = py_str(corpus);
        match (self.id, phase) {
            (SubjectId::Pandas, Phase::FirstRecord) => format!(
                r#"import time, pandas as pd
start = time.time()
for chunk in pd.read_json({path}, lines=True, chunksize=1):
    first = chunk.iloc[0]
    break
print(f"TTFL={{time.time() - start:.6f}}")
"#
            ),
            (SubjectId::Pandas, Phase::PeakMemory) => format!(
                r#"import pandas as pd
df = pd.read_json({path}, lines=True)
print(f"ROWS={{len(df)}}")
"#
            ),
            (SubjectId::Pandas, Phase::Dedup) => format!(
                r#"import time, pandas as pd
start = time.time()
df = pd.read_json({path}, lines=True)
before = len(df)
df = df.drop_duplicates(subset=["prompt", "response"])
after = len(df)
elapsed = time.time() - start
print(f"DEDUP={{elapsed:.6f}} before={{before}} after={{after}}")
"#
            ),
            (_, Phase::FirstRecord) => format!(
                r#"import time
from datasets import load_dataset
start = time.time()
ds = load_dataset("json", data_files={path}, split="train", streaming=True)
first = next(iter(ds))
print(f"TTFL={{time.time() - start:.6f}}")
"#
            ),
            (_, Phase::PeakMemory) => format!(
                r#"from datasets import load_dataset
ds = load_dataset("json", data_files={path}, split="train")
print(f"ROWS={{len(ds)}}")
"#
            ),
            (_, Phase::Dedup) => format!(
                r#"import time, hashlib
from datasets import load_dataset
start = time.time()
ds = load_dataset("json", data_files={path}, split="train")
seen = set()
def dedup(example):
    h = hashlib.md5((example.get("prompt", "") + example.get("response", "")).encode()).hexdigest()
    if h in seen:
        return False
    seen.add(h)
    return True
ds_deduped = ds.filter(dedup)
elapsed = time.time() - start
print(f"DEDUP={{elapsed:.6f}} before={{len(ds)}} after={{len(ds_deduped)}}")
"#
            ),
        }
    }
}

impl Subject for PythonBaseline {
    fn id(&self) -> SubjectId {
        self.id
    }

    fn dedups_sample(&self) -> bool {
        true
    }

    fn check(&self) -> BenchResult<()> {
        let python = self.python.to_string_lossy();
        if !command_succeeds(&python, &["--version"]) {
            return Err(BenchError::environment(
                format!("Python interpreter '{python}' not found"),
                "Install Python 3 or set [baselines] python in the config",
            ));
        }
        let import = format!("import {}", self.module);
        if !command_succeeds(&python, &["-c", &import]) {
            return Err(BenchError::environment(
                format!("Missing Python package '{}'", self.package),
                format!("Install with: pip install {}", self.package),
            ));
        }
        debug!(module = self.module, "baseline available");
        Ok(())
    }

    fn invocation(&self, phase: Phase, corpus: &Path) -> Invocation {
        let extractor: Box<dyn ResultExtractor> = match phase {
            Phase::FirstRecord => Box::new(PrefixMarker::seconds("TTFL=")),
            Phase::PeakMemory => Box::new(PrefixMarker::rows("ROWS=")),
            Phase::Dedup => Box::new(PrefixMarker::seconds("DEDUP=")),
        };
        Invocation {
            program: self.python.clone(),
            args: vec!["-c".into(), self.script(phase, corpus).into()],
            extractor,
        }
    }
}

/// A Python string literal for `path`. JSON string syntax is valid Python.
fn py_str(path: &Path) -> String {
    serde_json::Value::String(path.to_string_lossy().into_owned()).to_string()
}

fn command_succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_invocation() {
        let caret = Caret::new("/opt/caret");
        let inv = caret.invocation(Phase::Dedup, Path::new("data.jsonl"));
        assert_eq!(inv.program, "/opt/caret");
        assert_eq!(inv.args, ["data.jsonl", "--dedup"]);
        assert_eq!(inv.extractor.token(), "unique |");
        assert_eq!(
            caret
                .invocation(Phase::FirstRecord, Path::new("data.jsonl"))
                .extractor
                .token(),
            "Loaded"
        );
        assert!(!caret.dedups_sample());
    }

    #[test]
    fn test_caret_missing_without_toolchain() {
        let caret = Caret::new("/nonexistent/caret")
            .with_build_command(vec!["/nonexistent/cargo".into(), "build".into()]);
        let err = caret.check().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/nonexistent/caret"));
        assert!(err.to_string().contains("rustup"));
    }

    #[test]
    fn test_caret_empty_build_command() {
        let caret = Caret::new("/nonexistent/caret").with_build_command(Vec::new());
        assert!(matches!(caret.check(), Err(BenchError::Environment { .. })));
    }

    #[test]
    fn test_python_missing_interpreter() {
        let pandas = PythonBaseline::pandas("/nonexistent/python3");
        let err = pandas.check().unwrap_err();
        assert!(matches!(err, BenchError::Environment { .. }));
    }

    #[test]
    fn test_baseline_markers_per_phase() {
        let pandas = PythonBaseline::pandas("python3");
        let path = Path::new("/tmp/bench.jsonl");
        for (phase, token) in [
            (Phase::FirstRecord, "TTFL="),
            (Phase::PeakMemory, "ROWS="),
            (Phase::Dedup, "DEDUP="),
        ] {
            let inv = pandas.invocation(phase, path);
            assert_eq!(inv.program, "python3");
            assert_eq!(inv.args[0], "-c");
            assert_eq!(inv.extractor.token(), token);
            let script = inv.args[1].to_string_lossy();
            assert!(script.contains(token), "{phase}: {script}");
            assert!(script.contains("\"/tmp/bench.jsonl\""));
        }
        assert!(pandas.dedups_sample());
    }

    #[test]
    fn test_dedup_definitions_differ() {
        let path = Path::new("s.jsonl");
        let pandas = PythonBaseline::pandas("python3").script(Phase::Dedup, path);
        let hf = PythonBaseline::hf_datasets("python3").script(Phase::Dedup, path);
        assert!(pandas.contains("drop_duplicates(subset=[\"prompt\", \"response\"])"));
        assert!(hf.contains("hashlib.md5"));
        assert!(!hf.contains("streaming"));
        assert!(PythonBaseline::hf_datasets("python3")
            .script(Phase::FirstRecord, path)
            .contains("streaming=True"));
    }

    #[test]
    fn test_py_str_escapes_quotes() {
        assert_eq!(py_str(Path::new("a\"b.jsonl")), r#""a\"b.jsonl""#);
        assert_eq!(py_str(Path::new("/data/x.jsonl")), r#""/data/x.jsonl""#);
    }
}
