//! Typed error kinds surfaced by the core.
//!
//! Every state-mutating operation either completes fully and advances HEAD,
//! or leaves HEAD unchanged and surfaces one of these kinds with the
//! offending path or hash attached. The CLI collaborator maps kinds onto
//! its exit codes; the core itself never prints.

use std::path::PathBuf;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur inside the storage engine
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not a steria repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt object: {0}")]
    CorruptObject(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("merge left {} file(s) in conflict", .files.len())]
    MergeConflicts { files: Vec<String> },

    #[error("no common ancestor between the merged commits")]
    NoCommonAncestor,

    #[error("{stage} exceeded its deadline")]
    Timeout { stage: &'static str },

    /// Reported on behalf of a signing collaborator; the core never
    /// produces this on its own.
    #[error("signature rejected for {signer}")]
    SignatureInvalid { signer: String },
}

impl CoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptObject(err.to_string())
    }
}
