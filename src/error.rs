use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Insufficient items: requested {requested}, available {available}")]
    InsufficientItems { requested: usize, available: usize },

    #[error("Duplicate item id in pool: {0}")]
    DuplicateItem(String),

    #[error("Selected subsets overlap: {0}")]
    Overlap(String),

    #[error("Failed to write snapshot {}: {source}", path.display())]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {} is corrupted: {reason}", path.display())]
    SnapshotCorrupted { path: PathBuf, reason: String },

    #[error("Critical fault in stage {stage} on item {item_id}: {fault}")]
    CriticalFault {
        stage: String,
        item_id: String,
        fault: Fault,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EnrichError>;

/// Closed set of failure kinds a collaborator call can end in.
///
/// Processors map whatever their client library raises onto one of these
/// before handing the failure back to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Credentials rejected by the collaborator.
    Authentication,
    /// Credentials valid but not allowed to perform the call.
    Permission,
    /// Local setup is wrong (missing key, bad target language, ...).
    Configuration,
    /// Quota or rate limit hit.
    RateLimited,
    /// Collaborator answered with an error status.
    CollaboratorApi,
    /// Connection-level failure (DNS, reset, timeout).
    Network,
    /// Collaborator answered but the payload was unusable.
    InvalidResponse,
    Other,
}

impl FaultKind {
    /// Faults that no amount of retrying will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FaultKind::Authentication | FaultKind::Permission | FaultKind::Configuration
        )
    }

    /// Faults that usually clear up on their own.
    pub fn is_transient_api(&self) -> bool {
        matches!(
            self,
            FaultKind::RateLimited | FaultKind::CollaboratorApi | FaultKind::Network
        )
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultKind::Authentication => "AuthenticationFault",
            FaultKind::Permission => "PermissionFault",
            FaultKind::Configuration => "ConfigurationFault",
            FaultKind::RateLimited => "RateLimitFault",
            FaultKind::CollaboratorApi => "CollaboratorApiFault",
            FaultKind::Network => "NetworkFault",
            FaultKind::InvalidResponse => "InvalidResponseFault",
            FaultKind::Other => "Fault",
        };
        write!(f, "{name}")
    }
}

/// A failure raised while processing a single item.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Authentication, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RateLimited, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(FaultKind::CollaboratorApi, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Other, message)
    }
}

/// The external service a stage talks to.
///
/// Supplied explicitly by the caller when a stage runs; error and success
/// counters are keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Translation,
    Generation,
    Other(String),
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Collaborator::Translation => write!(f, "translation"),
            Collaborator::Generation => write!(f, "generation"),
            Collaborator::Other(name) => write!(f, "{name}"),
        }
    }
}
