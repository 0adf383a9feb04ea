use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure classes the engine absorbs instead of surfacing. Emitted as the
/// `anomaly` field on log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    Parse,
    MissingProfile,
    UnlockConflict,
    DoubleCompletion,
    WriteFailed,
}

impl Anomaly {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse_error",
            Self::MissingProfile => "missing_profile",
            Self::UnlockConflict => "unlock_conflict",
            Self::DoubleCompletion => "double_completion",
            Self::WriteFailed => "write_failed",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "storage quota exceeded writing {key}: {needed_bytes} bytes needed, {quota_bytes} allowed"
    )]
    QuotaExceeded {
        key: String,
        needed_bytes: usize,
        quota_bytes: usize,
    },
    #[error("failed to {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Error)]
#[error("stored value at {key} is malformed at {path}: {message}")]
pub struct ParseError {
    pub key: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: std::env::VarError,
    },
    #[error("failed to create store directory at {path}: {source}")]
    CreateStoreDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open file store: {0}")]
    Store(#[source] StoreError),
}
