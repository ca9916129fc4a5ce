//! The capability-restricted administrative tool for backends without a
//! live coordination service.

use async_trait::async_trait;
use shoal_model::{ExternalView, IdealState, IdealStateMode, InstanceConfig, StateModelDefinition};
use shoal_store::PropertyStore;
use shoal_store_file::FilePropertyStore;

use crate::{AdminError, ClusterAdmin, StoreClusterAdmin};

/// The restricted tool over the durable flat-file backend.
pub type FileClusterAdmin = RestrictedClusterAdmin<FilePropertyStore>;

/// Cluster administration restricted to what a backend without a live
/// coordination service can honestly answer.
///
/// Delegates the store-expressible operations to the strict tool and
/// fails fast with [`AdminError::Unsupported`] on the rest. Nothing is
/// approximated with a default or empty value.
#[derive(Clone, Debug)]
pub struct RestrictedClusterAdmin<S: PropertyStore> {
    inner: StoreClusterAdmin<S>,
}

impl<S: PropertyStore> RestrictedClusterAdmin<S> {
    /// Creates a restricted admin tool over the given store.
    pub const fn new(store: S) -> Self {
        Self {
            inner: StoreClusterAdmin::new(store),
        }
    }

    /// Borrows the underlying store.
    pub const fn store(&self) -> &S {
        self.inner.store()
    }
}

#[async_trait]
impl<S: PropertyStore> ClusterAdmin for RestrictedClusterAdmin<S> {
    async fn add_cluster(&self, cluster: &str, overwrite: bool) -> Result<(), AdminError> {
        self.inner.add_cluster(cluster, overwrite).await
    }

    async fn drop_cluster(&self, cluster: &str) -> Result<(), AdminError> {
        self.inner.drop_cluster(cluster).await
    }

    async fn get_clusters(&self) -> Result<Vec<String>, AdminError> {
        Err(AdminError::Unsupported("get_clusters"))
    }

    async fn is_cluster_setup(&self, cluster: &str) -> Result<bool, AdminError> {
        self.inner.is_cluster_setup(cluster).await
    }

    async fn add_instance(&self, cluster: &str, config: InstanceConfig) -> Result<(), AdminError> {
        self.inner.add_instance(cluster, config).await
    }

    async fn drop_instance(
        &self,
        cluster: &str,
        config: &InstanceConfig,
    ) -> Result<(), AdminError> {
        self.inner.drop_instance(cluster, config).await
    }

    async fn get_instances_in_cluster(&self, cluster: &str) -> Result<Vec<String>, AdminError> {
        self.inner.get_instances_in_cluster(cluster).await
    }

    async fn enable_instance(
        &self,
        _cluster: &str,
        _instance: &str,
        _enabled: bool,
    ) -> Result<(), AdminError> {
        Err(AdminError::Unsupported("enable_instance"))
    }

    async fn get_instance_config(
        &self,
        _cluster: &str,
        _instance: &str,
    ) -> Result<InstanceConfig, AdminError> {
        Err(AdminError::Unsupported("get_instance_config"))
    }

    async fn add_state_model_def(
        &self,
        cluster: &str,
        id: &str,
        definition: StateModelDefinition,
    ) -> Result<(), AdminError> {
        self.inner.add_state_model_def(cluster, id, definition).await
    }

    async fn get_state_model_defs(&self, _cluster: &str) -> Result<Vec<String>, AdminError> {
        Err(AdminError::Unsupported("get_state_model_defs"))
    }

    async fn get_state_model_def(
        &self,
        _cluster: &str,
        _id: &str,
    ) -> Result<StateModelDefinition, AdminError> {
        Err(AdminError::Unsupported("get_state_model_def"))
    }

    async fn add_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
    ) -> Result<(), AdminError> {
        self.inner
            .add_resource_group(cluster, resource_group, partitions, state_model)
            .await
    }

    async fn add_resource_group_with_mode(
        &self,
        _cluster: &str,
        _resource_group: &str,
        _partitions: u32,
        _state_model: &str,
        _mode: IdealStateMode,
    ) -> Result<(), AdminError> {
        Err(AdminError::Unsupported("add_resource_group_with_mode"))
    }

    async fn get_resource_groups_in_cluster(
        &self,
        _cluster: &str,
    ) -> Result<Vec<String>, AdminError> {
        Err(AdminError::Unsupported("get_resource_groups_in_cluster"))
    }

    async fn set_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
        ideal_state: IdealState,
    ) -> Result<(), AdminError> {
        self.inner
            .set_resource_group_ideal_state(cluster, resource_group, ideal_state)
            .await
    }

    async fn get_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<IdealState, AdminError> {
        self.inner
            .get_resource_group_ideal_state(cluster, resource_group)
            .await
    }

    async fn get_resource_group_external_view(
        &self,
        _cluster: &str,
        _resource_group: &str,
    ) -> Result<Option<ExternalView>, AdminError> {
        Err(AdminError::Unsupported("get_resource_group_external_view"))
    }

    async fn drop_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<(), AdminError> {
        self.inner.drop_resource_group(cluster, resource_group).await
    }
}
