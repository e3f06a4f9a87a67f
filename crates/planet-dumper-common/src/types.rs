//! Core types shared by the pipeline crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Monotonic replication sequence number identifying a database snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for SequenceNumber {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Working-directory cleanup policy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupMode {
    /// No automatic cleanup.
    #[default]
    None,
    /// Before work starts, remove every state directory but the current one.
    PreCleanOthers,
    /// After the run, remove every state directory but the current one.
    PostCleanOthers,
    /// After the run, remove the current state directory.
    PostCleanWorkdir,
    /// After the run, empty the whole working root.
    PostCleanAll,
}

impl CleanupMode {
    pub const ALL: [CleanupMode; 5] = [
        CleanupMode::None,
        CleanupMode::PreCleanOthers,
        CleanupMode::PostCleanOthers,
        CleanupMode::PostCleanWorkdir,
        CleanupMode::PostCleanAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupMode::None => "none",
            CleanupMode::PreCleanOthers => "pre-clean-others",
            CleanupMode::PostCleanOthers => "post-clean-others",
            CleanupMode::PostCleanWorkdir => "post-clean-workdir",
            CleanupMode::PostCleanAll => "post-clean-all",
        }
    }

    /// Whether this mode only touches sibling state directories.
    ///
    /// These are the modes available to commands that stop after the
    /// primary dump.
    pub fn is_basic(&self) -> bool {
        matches!(
            self,
            CleanupMode::None | CleanupMode::PreCleanOthers | CleanupMode::PostCleanOthers
        )
    }
}

impl fmt::Display for CleanupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CleanupMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = CleanupMode::ALL.iter().map(|m| m.as_str()).collect();
                format!("invalid cleanup mode '{s}', expected one of: {}", valid.join(", "))
            })
    }
}

/// The external tool stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Database-native export (pg_dump).
    PrimaryDump,
    /// Conversion of the primary dump into the distributable format.
    Conversion,
    /// Structural inspection of the final artifact.
    Info,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::PrimaryDump => "primary dump",
            StageKind::Conversion => "conversion",
            StageKind::Info => "info",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Descriptive record attached to a published dump.
///
/// Serialized as the dump-server registration body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpMetadata {
    pub name: String,
    pub bucket: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<SequenceNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DumpMetadata {
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            bucket: bucket.into(),
            timestamp,
            sequence_number: None,
            description: None,
        }
    }

    pub fn with_sequence_number(mut self, sequence_number: SequenceNumber) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
