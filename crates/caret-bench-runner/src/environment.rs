//! Host metadata printed under the report. Every field is best-effort.

use std::ffi::OsStr;
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use sysinfo::System;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EnvironmentInfo {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub cpu: Option<String>,
    pub cores: Option<usize>,
    pub ram_gb: Option<f64>,
    pub python: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl EnvironmentInfo {
    pub fn collect(python: &OsStr) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let cpu = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());
        let cores = Some(sys.cpus().len()).filter(|&n| n > 0);
        let ram_gb = Some(sys.total_memory())
            .filter(|&bytes| bytes > 0)
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0 * 1024.0));

        Self {
            os: System::long_os_version().or_else(|| Some(std::env::consts::OS.to_string())),
            arch: Some(std::env::consts::ARCH.to_string()),
            cpu,
            cores,
            ram_gb,
            python: python_version(python),
            collected_at: Utc::now(),
        }
    }

    /// `- Key: value` lines for the fields that could be determined.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(os) = &self.os {
            lines.push(format!("- OS: {os}"));
        }
        if let Some(arch) = &self.arch {
            lines.push(format!("- Arch: {arch}"));
        }
        match (&self.cpu, self.cores) {
            (Some(cpu), Some(cores)) => lines.push(format!("- CPU: {cpu} ({cores} cores)")),
            (Some(cpu), None) => lines.push(format!("- CPU: {cpu}")),
            (None, Some(cores)) => lines.push(format!("- CPU: {cores} cores")),
            (None, None) => {}
        }
        if let Some(ram) = self.ram_gb {
            lines.push(format!("- RAM: {ram:.0} GB"));
        }
        if let Some(python) = &self.python {
            lines.push(format!("- Python: {python}"));
        }
        lines.push(format!(
            "- Date: {}",
            self.collected_at.format("%Y-%m-%d %H:%M UTC")
        ));
        lines
    }
}

/// `Python 3.11.4` -> `3.11.4`. Old interpreters print the banner on stderr.
fn python_version(python: &OsStr) -> Option<String> {
    let output = Command::new(python)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| debug!("python --version failed: {e}"))
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = [output.stdout, output.stderr]
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .find(|s| !s.trim().is_empty())?;
    parse_python_version(&text)
}

fn parse_python_version(text: &str) -> Option<String> {
    let version = text.trim().strip_prefix("Python")?.trim();
    (!version.is_empty()).then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> EnvironmentInfo {
        EnvironmentInfo {
            os: None,
            arch: None,
            cpu: None,
            cores: None,
            ram_gb: None,
            python: None,
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_python_version() {
        assert_eq!(parse_python_version("Python 3.11.4\n"), Some("3.11.4".into()));
        assert_eq!(parse_python_version("Python\n"), None);
        assert_eq!(parse_python_version("command not found"), None);
    }

    #[test]
    fn test_unavailable_fields_are_omitted() {
        let lines = bare().lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("- Date: "));

        let mut env = bare();
        env.cores = Some(8);
        env.ram_gb = Some(31.6);
        env.python = Some("3.12.1".into());
        let lines = env.lines();
        assert!(lines.contains(&"- CPU: 8 cores".to_string()));
        assert!(lines.contains(&"- RAM: 32 GB".to_string()));
        assert!(lines.contains(&"- Python: 3.12.1".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("- OS")));
    }

    #[test]
    fn test_missing_python_is_omitted() {
        let env = EnvironmentInfo::collect(OsStr::new("/nonexistent/python3"));
        assert!(env.python.is_none());
        assert!(env.arch.is_some());
    }
}
