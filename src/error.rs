use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatrolError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PatrolError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        PatrolError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// A refused operation. The refusal is logged here so callers only have to
    /// propagate it.
    pub fn refused(subject: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        tracing::warn!(%subject, %reason, "operation refused");
        PatrolError::InconsistentState(format!("{subject}: {reason}"))
    }

    /// Classifies the failure for the caller's retry policy.
    pub fn kind(&self) -> FailureKind {
        match self {
            PatrolError::Storage(_) | PatrolError::Io(_) => FailureKind::System,
            _ => FailureKind::Business,
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::System
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<StoreError> for PatrolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => PatrolError::NotFound { kind, id },
            other => PatrolError::Storage(other),
        }
    }
}

/// Classifies a failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// The input or the current state is wrong; retrying will not help.
    Business,
    /// Storage or IO failed; the caller may retry.
    System,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
        }
    }
}

pub type Result<T> = core::result::Result<T, PatrolError>;
