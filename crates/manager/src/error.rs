use shoal_admin::AdminError;
use shoal_store::StoreError;
use thiserror::Error;

/// Failure conditions of a manager handle.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The handle has never been connected.
    #[error("handle is not connected")]
    NotConnected,

    /// The handle has been disconnected.
    #[error("handle is disconnected")]
    Disconnected,

    /// The operation is outside this role's or backend's capability
    /// boundary.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A malformed name or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The bound management tool failed.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// The underlying property store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
