mod config;
mod prompt;

use std::cell::Cell;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use caret_bench_core::{BenchError, CorpusInfo, Measurement, Outcome, Phase};
use caret_bench_corpus::{gb_to_bytes, scan_corpus, CorpusGenerator, CorpusStats, Progress};
use caret_bench_runner::report::group_digits;
use caret_bench_runner::{
    format_memory, format_time, render, render_environment, Caret, EnvironmentInfo, Orchestrator,
    PythonBaseline, ReportOptions, ResourceMeter, RunEvent, Subject,
};

use config::{load_config, show_config_path, Config};
use prompt::{offer_cleanup, Always, Confirm, StdinConfirm};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;
const DEFAULT_SIZE_GB: f64 = 10.0;
const DEFAULT_DATA_PATH: &str = "benchmark_data.jsonl";

#[derive(Parser)]
#[command(
    name = "caret-bench",
    version,
    about = "Benchmark caret against pandas and HuggingFace datasets"
)]
struct Cli {
    /// Config file (default: $CARET_BENCH_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging, unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a corpus (unless reused) and run all three benchmark phases
    Run {
        /// Size of the generated JSONL file in GB
        #[arg(long, default_value_t = DEFAULT_SIZE_GB)]
        size_gb: f64,

        /// Path to the caret binary
        #[arg(long)]
        caret_bin: Option<PathBuf>,

        /// Path of the corpus file
        #[arg(long, default_value = DEFAULT_DATA_PATH)]
        data_path: PathBuf,

        /// Reuse the corpus file if it exists
        #[arg(long)]
        skip_generate: bool,

        /// RNG seed for a reproducible corpus
        #[arg(long)]
        seed: Option<u64>,

        /// Lines in the sample the baselines dedup
        #[arg(long)]
        sample_lines: Option<u64>,

        /// Delete the corpus afterwards without asking
        #[arg(long, conflicts_with = "keep")]
        yes: bool,

        /// Keep the corpus and do not ask
        #[arg(long)]
        keep: bool,
    },
    /// Generate a corpus file only
    Generate {
        #[arg(long, default_value_t = DEFAULT_SIZE_GB)]
        size_gb: f64,

        #[arg(long, default_value = DEFAULT_DATA_PATH)]
        data_path: PathBuf,

        #[arg(long)]
        seed: Option<u64>,

        /// Share of records that are injected duplicates (0..=1)
        #[arg(long)]
        duplicate_ratio: Option<f64>,
    },
    /// Print host metadata as it appears under the report
    Env,
    /// Show the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(cli.verbose))
        .init();

    match dispatch(cli) {
        Ok(()) => Ok(()),
        Err(e) => match fatal_message(&e) {
            Some(msg) => {
                eprintln!("{msg}");
                std::process::exit(1);
            }
            None => Err(e),
        },
    }
}

/// `RUST_LOG` when set, otherwise warnings (debug with `--verbose`).
fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Operator-facing text for errors that mean the host is not set up to
/// benchmark. Anything else goes through anyhow's usual report.
fn fatal_message(err: &anyhow::Error) -> Option<String> {
    let bench = err.downcast_ref::<BenchError>()?;
    if !bench.is_fatal() {
        return None;
    }
    Some(match bench {
        BenchError::Environment { what, hint } => format!("ERROR: {what}\n{hint}"),
        other => format!("ERROR: {other}"),
    })
}

fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            size_gb,
            caret_bin,
            data_path,
            skip_generate,
            seed,
            sample_lines,
            yes,
            keep,
        } => {
            let opts = RunOptions {
                size_gb,
                caret_bin: caret_bin.unwrap_or_else(|| config.target.bin.clone()),
                data_path,
                skip_generate,
                seed: seed.or(config.corpus.seed),
                sample_lines: sample_lines.unwrap_or(config.corpus.sample_lines),
            };
            let mut confirm: Box<dyn Confirm> = if yes {
                Box::new(Always(true))
            } else if keep {
                Box::new(Always(false))
            } else {
                Box::new(StdinConfirm)
            };
            cmd_run(&config, &opts, confirm.as_mut())
        }
        Commands::Generate {
            size_gb,
            data_path,
            seed,
            duplicate_ratio,
        } => {
            let ratio = duplicate_ratio.unwrap_or(config.corpus.duplicate_ratio);
            if !(0.0..=1.0).contains(&ratio) {
                bail!("--duplicate-ratio must be between 0 and 1, got {ratio}");
            }
            let stats = generate(
                &data_path,
                size_gb,
                seed.or(config.corpus.seed),
                ratio,
                config.corpus.progress_interval,
            )?;
            eprintln!(
                "  {} injected duplicates ({:.1}%)",
                group_digits(stats.duplicates_injected),
                stats.duplicates_injected as f64 / stats.lines.max(1) as f64 * 100.0
            );
            Ok(())
        }
        Commands::Env => {
            let env = EnvironmentInfo::collect(config.baselines.python.as_ref());
            print!("{}", render_environment(&env));
            Ok(())
        }
        Commands::Config => {
            println!("# {}", show_config_path(cli.config.as_deref()));
            print!(
                "{}",
                toml::to_string_pretty(&config).context("serializing config")?
            );
            Ok(())
        }
    }
}

struct RunOptions {
    size_gb: f64,
    caret_bin: PathBuf,
    data_path: PathBuf,
    skip_generate: bool,
    seed: Option<u64>,
    sample_lines: u64,
}

fn cmd_run(config: &Config, opts: &RunOptions, confirm: &mut dyn Confirm) -> Result<()> {
    let subjects = build_subjects(config, &opts.caret_bin)?;
    let meter = ResourceMeter::detect();
    let probe = if meter.probe().is_available() {
        meter.probe().name().to_string()
    } else {
        "unavailable, peak memory will show N/A".to_string()
    };
    let orchestrator = Orchestrator::new(meter, subjects)
        .with_timeouts(config.timeouts.to_timeouts())
        .with_sample_lines(opts.sample_lines);

    // Fatal environment problems surface before any corpus is written.
    orchestrator.check_environment()?;

    let corpus = prepare_corpus(config, opts)?;

    let rule = "=".repeat(60);
    eprintln!();
    eprintln!("{rule}");
    eprintln!("  BENCHMARK: Caret vs Pandas vs HuggingFace Datasets");
    eprintln!(
        "  Data: {:.1} GB JSONL ({} lines)",
        corpus.size_gb(),
        group_digits(corpus.lines)
    );
    eprintln!("  Memory probe: {probe}");
    eprintln!("{rule}");

    let sample_lines = Cell::new(orchestrator.sample_lines());
    let report = orchestrator
        .with_observer(|event| print_event(event, &sample_lines))
        .run(corpus);

    let env = EnvironmentInfo::collect(config.baselines.python.as_ref());
    println!();
    print!(
        "{}",
        render(&report, &ReportOptions::new(opts.sample_lines).with_environment(env))
    );

    if offer_cleanup(&opts.data_path, confirm)? {
        eprintln!("Deleted.");
    }
    Ok(())
}

fn build_subjects<'a>(config: &Config, caret_bin: &Path) -> Result<Vec<Box<dyn Subject + 'a>>> {
    let mut subjects: Vec<Box<dyn Subject + 'a>> = vec![Box::new(
        Caret::new(caret_bin).with_build_command(config.target.build_command.clone()),
    )];
    let python = config.baselines.python.as_str();
    for module in &config.baselines.required_modules {
        match module.as_str() {
            "pandas" => subjects.push(Box::new(PythonBaseline::pandas(python))),
            "datasets" => subjects.push(Box::new(PythonBaseline::hf_datasets(python))),
            other => bail!("unknown baseline module '{other}' (expected pandas or datasets)"),
        }
    }
    Ok(subjects)
}

fn prepare_corpus(config: &Config, opts: &RunOptions) -> Result<CorpusInfo> {
    if opts.skip_generate && opts.data_path.exists() {
        let info = scan_corpus(&opts.data_path)
            .with_context(|| format!("scanning {}", opts.data_path.display()))?;
        eprintln!(
            "Reusing existing file: {} ({:.2} GB, {} lines)",
            info.path.display(),
            info.size_gb(),
            group_digits(info.lines)
        );
        return Ok(info);
    }

    let stats = generate(
        &opts.data_path,
        opts.size_gb,
        opts.seed,
        config.corpus.duplicate_ratio,
        config.corpus.progress_interval,
    )?;
    Ok(CorpusInfo {
        path: opts.data_path.clone(),
        bytes: stats.bytes,
        lines: stats.lines,
    })
}

fn generate(
    path: &Path,
    size_gb: f64,
    seed: Option<u64>,
    duplicate_ratio: f64,
    progress_interval: u64,
) -> Result<CorpusStats> {
    if !size_gb.is_finite() || size_gb <= 0.0 {
        bail!("--size-gb must be a positive number, got {size_gb}");
    }
    eprintln!("Generating {size_gb} GB JSONL file: {}", path.display());

    let generator = match seed {
        Some(seed) => CorpusGenerator::seeded(seed),
        None => CorpusGenerator::from_entropy(),
    };
    let stats = generator
        .with_duplicate_ratio(duplicate_ratio)
        .with_progress_interval(progress_interval)
        .generate_file(path, gb_to_bytes(size_gb), print_progress)
        .with_context(|| format!("generating {}", path.display()))?;

    eprintln!(
        "Done: {} lines, {:.2} GB in {:.1}s",
        group_digits(stats.lines),
        stats.bytes as f64 / GB,
        stats.elapsed.as_secs_f64()
    );
    Ok(stats)
}

fn print_progress(p: &Progress) {
    eprintln!(
        "  {:5.1}% | {:>10} lines | {:.2} GB | {:.0} MB/s",
        p.percent,
        group_digits(p.lines),
        p.bytes as f64 / GB,
        p.mb_per_sec
    );
}

fn print_event(event: &RunEvent<'_>, sample_lines: &Cell<u64>) {
    match event {
        RunEvent::PhaseStarted { index, phase } => {
            let title = match phase {
                Phase::FirstRecord => "Time to First Line",
                Phase::PeakMemory => "Peak Memory Usage (RSS)",
                Phase::Dedup => "Deduplication Time",
            };
            eprintln!();
            eprintln!("[{}/{}] {title}", index + 1, Phase::ALL.len());
        }
        RunEvent::SampleCreated { path, lines } => {
            sample_lines.set(*lines);
            eprintln!(
                "  Created {}-line dedup sample: {}",
                group_digits(*lines),
                path.display()
            );
        }
        RunEvent::SubjectStarted {
            subject,
            phase,
            on_sample,
        } => {
            let what = match (phase, on_sample) {
                (Phase::FirstRecord, _) => "time to first line".to_string(),
                (Phase::PeakMemory, _) => "memory usage".to_string(),
                (Phase::Dedup, true) => format!("dedup ({} lines)", group_digits(sample_lines.get())),
                (Phase::Dedup, false) => "dedup scan (full file)".to_string(),
            };
            eprintln!("  [{subject}] {what}...");
        }
        RunEvent::SubjectFinished(m) => eprintln!("    {}", summarize(m)),
        RunEvent::SampleRemoved { .. } => {}
    }
}

fn summarize(m: &Measurement) -> String {
    match m.outcome {
        Outcome::TimedOut => "timeout".into(),
        Outcome::Failed { exit_code: Some(code) } => format!("failed (exit {code})"),
        Outcome::Failed { exit_code: None } => "failed".into(),
        Outcome::Measured | Outcome::Fallback => {
            let time = m.seconds.map(format_time).unwrap_or_else(|| "-".into());
            let mut s = format!("{time}, {}", format_memory(m.peak_rss_mb));
            if let Some(c) = m.counts {
                s.push_str(&format!(
                    ", {} -> {} records",
                    group_digits(c.before),
                    group_digits(c.after)
                ));
            }
            if m.outcome == Outcome::Fallback {
                s.push_str(" (wall time)");
            }
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caret_bench_core::{DedupCounts, SubjectId};

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "caret-bench",
            "--verbose",
            "run",
            "--size-gb",
            "0.5",
            "--skip-generate",
            "--seed",
            "9",
            "--yes",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                size_gb,
                skip_generate,
                seed,
                yes,
                keep,
                data_path,
                ..
            } => {
                assert_eq!(size_gb, 0.5);
                assert!(skip_generate);
                assert_eq!(seed, Some(9));
                assert!(yes && !keep);
                assert_eq!(data_path, PathBuf::from(DEFAULT_DATA_PATH));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_yes_and_keep_conflict() {
        assert!(Cli::try_parse_from(["caret-bench", "run", "--yes", "--keep"]).is_err());
    }

    #[test]
    fn test_build_subjects_from_config() {
        let config = Config::default();
        let subjects = build_subjects(&config, Path::new("/opt/caret")).unwrap();
        let ids: Vec<_> = subjects.iter().map(|s| s.id()).collect();
        assert_eq!(ids, SubjectId::ALL);

        let mut config = Config::default();
        config.baselines.required_modules = vec!["polars".into()];
        assert!(build_subjects(&config, Path::new("/opt/caret")).is_err());
    }

    #[test]
    fn test_prepare_corpus_reuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2}\n").unwrap();
        let opts = RunOptions {
            size_gb: 1.0,
            caret_bin: PathBuf::from("caret"),
            data_path: path.clone(),
            skip_generate: true,
            seed: None,
            sample_lines: 10,
        };
        let info = prepare_corpus(&Config::default(), &opts).unwrap();
        assert_eq!(info.lines, 2);
        assert_eq!(info.bytes, 16);
    }

    #[test]
    fn test_prepare_corpus_generates_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        let opts = RunOptions {
            size_gb: 64.0 * 1024.0 / GB,
            caret_bin: PathBuf::from("caret"),
            data_path: path.clone(),
            skip_generate: true,
            seed: Some(1),
            sample_lines: 10,
        };
        let info = prepare_corpus(&Config::default(), &opts).unwrap();
        assert!(info.bytes >= 64 * 1024);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), info.bytes);
    }

    #[test]
    fn test_generate_rejects_non_positive_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");
        for size_gb in [0.0, -1.0, f64::INFINITY, f64::NAN] {
            assert!(generate(&path, size_gb, Some(1), 0.2, 10).is_err(), "{size_gb}");
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_generate_rejects_infinite_size_from_cli() {
        let cli = Cli::try_parse_from(["caret-bench", "generate", "--size-gb", "inf"]).unwrap();
        let Commands::Generate { size_gb, .. } = cli.command else {
            panic!("expected generate");
        };
        let dir = tempfile::tempdir().unwrap();
        let err = generate(&dir.path().join("data.jsonl"), size_gb, Some(1), 0.2, 10).unwrap_err();
        assert!(err.to_string().contains("positive"), "{err}");
    }

    #[test]
    fn test_fatal_message_only_for_fatal_errors() {
        let env = anyhow::Error::new(BenchError::environment(
            "caret binary not found",
            "cargo build --release",
        ));
        assert_eq!(
            fatal_message(&env).unwrap(),
            "ERROR: caret binary not found\ncargo build --release"
        );

        let io = anyhow::Error::new(BenchError::Io(std::io::Error::other("disk full")));
        assert_eq!(fatal_message(&io).unwrap(), "ERROR: io error: disk full");

        let timeout = anyhow::Error::new(BenchError::Timeout {
            program: "python3".into(),
            secs: 600,
        });
        assert!(fatal_message(&timeout).is_none());
        assert!(fatal_message(&anyhow::anyhow!("bad flag")).is_none());
    }

    #[test]
    fn test_log_filter_defaults_to_warn_or_debug() {
        // RUST_LOG overrides the default, so only check when it is unset.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter(false).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(true).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_summarize() {
        let mut m = Measurement::timed_out(SubjectId::Pandas, Phase::Dedup);
        assert_eq!(summarize(&m), "timeout");
        m.outcome = Outcome::Fallback;
        m.seconds = Some(1.5);
        m.peak_rss_mb = 300.0;
        m.counts = Some(DedupCounts {
            before: 2000,
            after: 1600,
        });
        assert_eq!(summarize(&m), "1.5 s, 300 MB, 2,000 -> 1,600 records (wall time)");
    }
}
