//! Markdown report: dataset line, comparison table, sample footnote, dedup
//! counts and environment block.

use std::fmt::Write as _;

use caret_bench_core::{BenchmarkReport, DedupCounts, Measurement, Outcome, Phase, SubjectId};
use caret_bench_corpus::DedupKey;

use crate::environment::EnvironmentInfo;

pub struct ReportOptions {
    /// Sample size to cite when the run could not record an actual one.
    pub sample_lines: u64,
    pub environment: Option<EnvironmentInfo>,
}

impl ReportOptions {
    pub fn new(sample_lines: u64) -> Self {
        Self {
            sample_lines,
            environment: None,
        }
    }

    pub fn with_environment(mut self, env: EnvironmentInfo) -> Self {
        self.environment = Some(env);
        self
    }
}

pub fn format_time(seconds: f64) -> String {
    if seconds < 0.001 {
        format!("{:.0} µs", seconds * 1_000_000.0)
    } else if seconds < 1.0 {
        format!("{:.0} ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.1} s", seconds)
    } else {
        format!("{:.1} min", seconds / 60.0)
    }
}

/// `0.0` is the unknown sentinel and prints as `N/A`.
pub fn format_memory(mb: f64) -> String {
    if mb == 0.0 {
        "N/A".to_string()
    } else if mb < 1024.0 {
        format!("{:.0} MB", mb)
    } else {
        format!("{:.1} GB", mb / 1024.0)
    }
}

/// `1234567` -> `1,234,567`.
pub fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn cell(m: Option<&Measurement>) -> String {
    let Some(m) = m else {
        return "-".to_string();
    };
    let text = match m.outcome {
        Outcome::TimedOut => "timeout".to_string(),
        Outcome::Failed { .. } => "failed".to_string(),
        Outcome::Measured | Outcome::Fallback => match m.phase {
            Phase::PeakMemory => format_memory(m.peak_rss_mb),
            _ => m.seconds.map(format_time).unwrap_or_else(|| "-".into()),
        },
    };
    let text = if m.subject.is_target() {
        format!("**{text}**")
    } else {
        text
    };
    if m.on_sample {
        format!("{text}*")
    } else {
        text
    }
}

fn counts_line(c: &DedupCounts) -> String {
    format!(
        "{} → {} ({} removed)",
        group_digits(c.before),
        group_digits(c.after),
        group_digits(c.removed())
    )
}

pub fn render(report: &BenchmarkReport, opts: &ReportOptions) -> String {
    let mut out = String::new();
    let size_gb = report.corpus.size_gb();

    let _ = writeln!(out, "## Benchmark Results");
    let _ = writeln!(out);
    let _ = writeln!(out, "Run: `{}`", report.run_id);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Dataset:** {:.1} GB JSONL ({} lines)",
        size_gb,
        group_digits(report.corpus.lines)
    );
    let _ = writeln!(out);

    let mut header = String::from("| Metric |");
    let mut rule = String::from("|--------|");
    for subject in SubjectId::ALL {
        let _ = write!(header, " {} |", subject.label());
        let _ = write!(rule, "{}|", "-".repeat(subject.label().len() + 2));
    }
    let _ = writeln!(out, "{header}");
    let _ = writeln!(out, "{rule}");
    for phase in Phase::ALL {
        let _ = write!(out, "| {} |", phase.label());
        for subject in SubjectId::ALL {
            let _ = write!(out, " {} |", cell(report.get(subject, phase)));
        }
        let _ = writeln!(out);
    }

    let sampled: Vec<&str> = report
        .measurements
        .iter()
        .filter(|m| m.on_sample)
        .map(|m| m.subject.label())
        .collect();
    if !sampled.is_empty() {
        let lines = report
            .sample
            .as_ref()
            .map(|s| s.lines)
            .unwrap_or(opts.sample_lines);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "*\\*{} dedup measured on {}-line sample (full {:.1} GB would OOM). {} runs on the full file.*",
            sampled.join(" and "),
            group_digits(lines),
            size_gb,
            SubjectId::Caret.label()
        );
    }

    render_dedup_counts(&mut out, report);

    if let Some(env) = &opts.environment {
        let _ = writeln!(out);
        out.push_str(&render_environment(env));
    }
    out
}

fn render_dedup_counts(out: &mut String, report: &BenchmarkReport) {
    let rows: Vec<(&Measurement, &DedupCounts)> = SubjectId::ALL
        .into_iter()
        .filter_map(|s| report.get(s, Phase::Dedup))
        .filter(|m| m.outcome.is_usable())
        .filter_map(|m| m.counts.as_ref().map(|c| (m, c)))
        .collect();
    if rows.is_empty() && report.sample.is_none() {
        return;
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "**Dedup counts:**");
    for (m, c) in rows {
        let scope = if m.on_sample { "sample" } else { "full file" };
        let _ = writeln!(out, "- {}: {} [{scope}]", m.subject.label(), counts_line(c));
    }
    if let Some(sample) = &report.sample {
        for (key, counts) in [
            (DedupKey::FieldTuple, &sample.field_tuple),
            (DedupKey::ConcatHash, &sample.concat_hash),
        ] {
            let _ = writeln!(
                out,
                "- Reference, {} [sample]: {}",
                key.label(),
                counts_line(counts)
            );
        }
        if sample.definitions_diverge() {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Note: the baselines use different duplicate definitions and disagree on this sample \
                 ({} vs {} records removed), so their dedup times are not strictly comparable.",
                group_digits(sample.field_tuple.removed()),
                group_digits(sample.concat_hash.removed())
            );
        }
    }
}

pub fn render_environment(env: &EnvironmentInfo) -> String {
    let mut out = String::from("**Environment:**\n");
    for line in env.lines() {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
