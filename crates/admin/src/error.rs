use shoal_store::StoreError;
use thiserror::Error;

/// Failure conditions of the administrative API. Each is reported
/// synchronously and distinctly; none are downgraded to a boolean.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The cluster namespace does not exist.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// The cluster namespace already exists.
    #[error("cluster already exists: {0}")]
    ClusterAlreadyExists(String),

    /// The instance is not registered in the cluster.
    #[error("instance not found: {instance} in cluster {cluster}")]
    InstanceNotFound {
        /// The cluster searched.
        cluster: String,
        /// The missing instance id.
        instance: String,
    },

    /// The instance id is already registered.
    #[error("instance already exists: {instance} in cluster {cluster}")]
    InstanceAlreadyExists {
        /// The cluster.
        cluster: String,
        /// The occupied instance id.
        instance: String,
    },

    /// Referential-integrity violation: a resource group referenced a
    /// state model that is not stored.
    #[error("state model not found: {0}")]
    StateModelNotFound(String),

    /// The state-model id is already stored; definitions are immutable.
    #[error("state model already exists: {0}")]
    StateModelAlreadyExists(String),

    /// The resource group is not declared in the cluster.
    #[error("resource group not found: {0}")]
    ResourceGroupNotFound(String),

    /// The operation is outside this backend's capability boundary.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A malformed name or argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying property store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
