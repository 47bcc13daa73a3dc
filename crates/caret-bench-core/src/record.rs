use serde::{Deserialize, Serialize};
use std::fmt;

/// One corpus line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub prompt: String,
    pub response: String,
    pub metadata: Metadata,
}

impl Record {
    /// The pair both baselines deduplicate on. Metadata is ignored.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.prompt, &self.response)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub source: Source,
    /// In `[0.5, 1.0]`, two decimals.
    pub quality: f64,
    /// In `[50, 2000]`.
    pub tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Web,
    Book,
    Code,
    Wiki,
}

impl Source {
    pub const ALL: [Source; 4] = [Self::Web, Self::Book, Self::Code, Self::Wiki];
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Web => write!(f, "web"),
            Self::Book => write!(f, "book"),
            Self::Code => write!(f, "code"),
            Self::Wiki => write!(f, "wiki"),
        }
    }
}
