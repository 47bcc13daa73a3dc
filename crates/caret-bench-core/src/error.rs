use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Missing executable, library or toolchain. `hint` is the command that fixes it.
    #[error("{what}\n  {hint}")]
    Environment { what: String, hint: String },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BenchError {
    pub fn environment(what: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Environment {
            what: what.into(),
            hint: hint.into(),
        }
    }

    /// Fatal errors mean the host is not set up to benchmark: the CLI stops
    /// with exit code 1. The rest only cost a single measurement.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Environment { .. } | Self::Io(_) | Self::Serialization(_) => true,
            Self::Timeout { .. } | Self::Parse(_) => false,
        }
    }
}

pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BenchError::environment("caret not found", "cargo build --release").is_fatal());
        assert!(BenchError::Io(std::io::Error::other("disk full")).is_fatal());
        assert!(!BenchError::Timeout {
            program: "python3".into(),
            secs: 300
        }
        .is_fatal());
        assert!(!BenchError::Parse("no marker".into()).is_fatal());
    }

    #[test]
    fn test_environment_message_carries_hint() {
        let err = BenchError::environment("missing python package 'pandas'", "pip install pandas");
        let msg = err.to_string();
        assert!(msg.contains("pandas"));
        assert!(msg.contains("pip install pandas"));
    }
}
