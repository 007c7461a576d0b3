use std::path::PathBuf;
use thiserror::Error;

use crate::motif::MotifError;

/// Operator-authored configuration that cannot be honoured. Always fatal for startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("manifest entry {index}: missing required key `{key}`")]
    MissingKey { index: usize, key: &'static str },
    #[error("host `{name}`: unsupported location type `{kind}`")]
    UnsupportedLocationType { name: String, kind: String },
    #[error("cannot read {path}: {cause}")]
    Unreadable { path: PathBuf, cause: String },
    #[error("host `{name}`: invalid graph: {cause}")]
    InvalidGraph { name: String, cause: String },
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("duplicate host uri `{0}`")]
    DuplicateUri(String),
}

/// A discovery entry that was skipped under the best-effort policy.
#[derive(Debug, Clone, Error)]
#[error("{source_kind} entry `{entry}` skipped: {cause}")]
pub struct DiscoveryWarning {
    pub source_kind: &'static str,
    pub entry: String,
    pub cause: String,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryWarning),
    #[error("host not found: {0}")]
    HostNotFound(String),
    #[error("backend failure on {uri}: {cause}")]
    Backend { uri: String, cause: String },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error(transparent)]
    Motif(#[from] MotifError),
}

impl HostError {
    pub fn backend(uri: impl Into<String>, cause: impl ToString) -> Self {
        HostError::Backend { uri: uri.into(), cause: cause.to_string() }
    }

    /// Short label used for the `outcome` metric attribute.
    pub fn outcome(&self) -> &'static str {
        match self {
            HostError::Configuration(_) => "configuration",
            HostError::Discovery(_) => "discovery",
            HostError::HostNotFound(_) => "not_found",
            HostError::Backend { .. } => "backend",
            HostError::Storage(_) => "storage",
            HostError::Motif(_) => "motif",
        }
    }
}

impl From<sled::Error> for HostError {
    fn from(e: sled::Error) -> Self { HostError::Storage(e.to_string()) }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self { HostError::Storage(format!("record codec: {e}")) }
}

pub type HostResult<T> = Result<T, HostError>;
