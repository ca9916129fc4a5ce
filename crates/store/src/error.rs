use thiserror::Error;

/// Errors shared by every property-store backend.
///
/// One concrete taxonomy keeps failure conditions distinct and catchable
/// regardless of which backend raised them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path is vacant.
    #[error("not found: {path}")]
    NotFound {
        /// The vacant path.
        path: String,
    },

    /// The path is already occupied.
    #[error("already exists: {path}")]
    AlreadyExists {
        /// The occupied path.
        path: String,
    },

    /// The operation is outside this backend's capability boundary.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A malformed path or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The handle's session has been torn down.
    #[error("store is stopped")]
    Disconnected,

    /// Record codec failure at the serialization boundary.
    #[error(transparent)]
    Serde(#[from] shoal_record::Error),

    /// Filesystem failure.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Coordination-service failure.
    #[error("backend error during {op}: {message}")]
    Backend {
        /// The store operation that failed.
        op: &'static str,
        /// Backend-reported detail.
        message: String,
    },
}

impl StoreError {
    /// Builds a [`Self::Backend`] from any displayable backend error.
    pub fn backend(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            op,
            message: err.to_string(),
        }
    }

    /// Builds a [`Self::NotFound`] for a path.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Builds a [`Self::AlreadyExists`] for a path.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }
}
