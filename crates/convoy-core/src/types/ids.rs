//! Identifiers: services, runs and revisions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a migrated service (e.g. `users`, `billing`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ids end up in directory names and SQL keys, so keep them boring.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One orchestrator invocation. Ties backups and audit entries together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for summary tables.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Revision identifier. Numbered engines use sequence numbers, chain engines
/// use opaque labels; ordering only ever matters within one service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RevisionId {
    Number(u64),
    Label(String),
}

impl RevisionId {
    /// Parse the textual form written by `Display`. All-digit strings are
    /// sequence numbers.
    pub fn parse(s: &str) -> Self {
        match s.parse::<u64>() {
            Ok(n) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => Self::Number(n),
            _ => Self::Label(s.to_string()),
        }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Label(l) => f.write_str(l),
        }
    }
}

impl From<u64> for RevisionId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RevisionId {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Render an optional revision the way reports and audit details show it.
pub fn display_revision(rev: Option<&RevisionId>) -> String {
    rev.map(|r| r.to_string()).unwrap_or_else(|| "base".to_string())
}
