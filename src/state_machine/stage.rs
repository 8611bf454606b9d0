use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The processing stages of an enrichment run, in order.
///
/// A run flows: NOT_STARTED → LOADING → SELECTING → TRANSLATING → GENERATING
/// → CONSOLIDATING → EXPORTING → COMPLETED
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    NotStarted,
    Loading,
    Selecting,
    Translating,
    Generating,
    Consolidating,
    Exporting,
    Completed,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 8] = [
        ProcessingStage::NotStarted,
        ProcessingStage::Loading,
        ProcessingStage::Selecting,
        ProcessingStage::Translating,
        ProcessingStage::Generating,
        ProcessingStage::Consolidating,
        ProcessingStage::Exporting,
        ProcessingStage::Completed,
    ];

    /// Position in the fixed stage ordering.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether `self` is the same stage as `other` or comes after it.
    pub fn is_at_or_after(self, other: ProcessingStage) -> bool {
        self.index() >= other.index()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStage::NotStarted => "not_started",
            ProcessingStage::Loading => "loading",
            ProcessingStage::Selecting => "selecting",
            ProcessingStage::Translating => "translating",
            ProcessingStage::Generating => "generating",
            ProcessingStage::Consolidating => "consolidating",
            ProcessingStage::Exporting => "exporting",
            ProcessingStage::Completed => "completed",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown processing stage: {}", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for ProcessingStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}
