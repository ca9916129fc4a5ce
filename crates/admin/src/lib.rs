//! The cluster-management administrative API, expressed purely in terms
//! of the property store and the namespace scheme.
//!
//! Two implementations mirror the two store backends:
//! [`StoreClusterAdmin`] honors the full contract over any backend, while
//! [`FileClusterAdmin`] fails fast with [`AdminError::Unsupported`] on the
//! operations that are meaningless without a live coordination service.
//! The asymmetry is a deliberate capability boundary, never silent
//! behavioral drift.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod file_admin;
mod store_admin;

pub use error::AdminError;
pub use file_admin::{FileClusterAdmin, RestrictedClusterAdmin};
pub use store_admin::StoreClusterAdmin;

use async_trait::async_trait;
use shoal_model::{ExternalView, IdealState, IdealStateMode, InstanceConfig, StateModelDefinition};

/// Administrative operations on cluster metadata.
///
/// Every operation except `add_cluster` and `get_clusters` requires the
/// cluster to exist. Composite operations that touch several paths are
/// not atomic across them; callers treat repetition as safe.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Creates a cluster's full fixed namespace tree.
    ///
    /// Idempotent when `overwrite` is true (an existing cluster is wiped
    /// and recreated); otherwise a second call fails
    /// [`AdminError::ClusterAlreadyExists`].
    async fn add_cluster(&self, cluster: &str, overwrite: bool) -> Result<(), AdminError>;

    /// Removes a cluster's entire namespace.
    async fn drop_cluster(&self, cluster: &str) -> Result<(), AdminError>;

    /// All cluster names known to the store.
    async fn get_clusters(&self) -> Result<Vec<String>, AdminError>;

    /// True iff every fixed child namespace of the cluster exists.
    async fn is_cluster_setup(&self, cluster: &str) -> Result<bool, AdminError>;

    /// Registers an instance.
    async fn add_instance(&self, cluster: &str, config: InstanceConfig) -> Result<(), AdminError>;

    /// Removes an instance and its dependent per-instance nodes.
    async fn drop_instance(
        &self,
        cluster: &str,
        config: &InstanceConfig,
    ) -> Result<(), AdminError>;

    /// The registered instance ids.
    async fn get_instances_in_cluster(&self, cluster: &str) -> Result<Vec<String>, AdminError>;

    /// Toggles an instance's enabled flag.
    async fn enable_instance(
        &self,
        cluster: &str,
        instance: &str,
        enabled: bool,
    ) -> Result<(), AdminError>;

    /// Reads an instance's configuration.
    async fn get_instance_config(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<InstanceConfig, AdminError>;

    /// Stores a state-model definition. Duplicate ids are rejected.
    async fn add_state_model_def(
        &self,
        cluster: &str,
        id: &str,
        definition: StateModelDefinition,
    ) -> Result<(), AdminError>;

    /// The stored state-model ids.
    async fn get_state_model_defs(&self, cluster: &str) -> Result<Vec<String>, AdminError>;

    /// Reads one state-model definition.
    async fn get_state_model_def(
        &self,
        cluster: &str,
        id: &str,
    ) -> Result<StateModelDefinition, AdminError>;

    /// Declares a resource group in AUTO mode.
    ///
    /// The referenced state model must already exist
    /// ([`AdminError::StateModelNotFound`], with no partial creation).
    /// Declaring an existing group again is an idempotent no-op.
    async fn add_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
    ) -> Result<(), AdminError>;

    /// [`Self::add_resource_group`] with an explicit placement mode.
    async fn add_resource_group_with_mode(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
        mode: IdealStateMode,
    ) -> Result<(), AdminError>;

    /// The declared resource-group names.
    async fn get_resource_groups_in_cluster(
        &self,
        cluster: &str,
    ) -> Result<Vec<String>, AdminError>;

    /// Wholesale write of a resource group's ideal state.
    async fn set_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
        ideal_state: IdealState,
    ) -> Result<(), AdminError>;

    /// Wholesale read of a resource group's ideal state.
    async fn get_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<IdealState, AdminError>;

    /// The stored external view, or `None` until a controller has
    /// computed one.
    async fn get_resource_group_external_view(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<Option<ExternalView>, AdminError>;

    /// Removes a resource group's subtrees. Not atomic across paths;
    /// repetition after a mid-operation crash is safe.
    async fn drop_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<(), AdminError>;
}
