//! Error taxonomy shared by every bridge component.

use serde_json::{json, Value};
use thiserror::Error;

/// Failure of a capability call, synchronous or asynchronous.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("window '{0}' already exists")]
    DuplicateWindow(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to load window '{id}': {reason}")]
    LoadError { id: String, reason: String },

    #[error("unknown addon '{0}'")]
    UnknownAddon(String),

    #[error("bridge shut down before the request completed")]
    Shutdown,
}

impl BridgeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable name of the variant, as reported to scripts.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::DuplicateWindow(_) => "DuplicateWindow",
            Self::NotFound(_) => "NotFound",
            Self::LoadError { .. } => "LoadError",
            Self::UnknownAddon(_) => "UnknownAddon",
            Self::Shutdown => "Shutdown",
        }
    }

    /// Script-facing representation: `{"kind": ..., "message": ...}`.
    pub fn to_value(&self) -> Value {
        json!({ "kind": self.kind(), "message": self.to_string() })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
