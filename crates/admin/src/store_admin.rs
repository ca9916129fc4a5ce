//! The strict administrative implementation, honoring the full contract
//! over any property-store backend.

use async_trait::async_trait;
use shoal_model::{
    ExternalView, IdealState, IdealStateMode, InstanceConfig, PropertyType, StateModelDefinition,
    is_valid_segment,
};
use shoal_record::Record;
use shoal_store::{PropertyStore, StoreError};
use tracing::{debug, info};

use crate::{AdminError, ClusterAdmin};

/// Full-contract cluster administration over a property store.
#[derive(Clone, Debug)]
pub struct StoreClusterAdmin<S: PropertyStore> {
    store: S,
}

impl<S: PropertyStore> StoreClusterAdmin<S> {
    /// Creates an admin tool over the given store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrows the underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn cluster_root(cluster: &str) -> String {
        format!("/{cluster}")
    }

    fn check_segment(name: &str, what: &str) -> Result<(), AdminError> {
        if is_valid_segment(name) {
            Ok(())
        } else {
            Err(AdminError::InvalidArgument(format!("bad {what}: {name:?}")))
        }
    }

    async fn require_cluster(&self, cluster: &str) -> Result<(), AdminError> {
        Self::check_segment(cluster, "cluster name")?;
        if self.store.exists(&Self::cluster_root(cluster)).await? {
            Ok(())
        } else {
            Err(AdminError::ClusterNotFound(cluster.to_string()))
        }
    }

    async fn require_instance(&self, cluster: &str, instance: &str) -> Result<String, AdminError> {
        Self::check_segment(instance, "instance id")?;
        let config_path = PropertyType::Configs.path(cluster, &[instance]);
        if self.store.exists(&config_path).await? {
            Ok(config_path)
        } else {
            Err(AdminError::InstanceNotFound {
                cluster: cluster.to_string(),
                instance: instance.to_string(),
            })
        }
    }

    async fn add_resource_group_inner(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
        mode: IdealStateMode,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        Self::check_segment(resource_group, "resource group name")?;
        let state_model_path = PropertyType::StateModelDefs.path(cluster, &[state_model]);
        if !self.store.exists(&state_model_path).await? {
            return Err(AdminError::StateModelNotFound(state_model.to_string()));
        }

        let ideal_state_path = PropertyType::IdealStates.path(cluster, &[resource_group]);
        if self.store.exists(&ideal_state_path).await? {
            debug!(cluster, resource_group, "resource group already declared");
            return Ok(());
        }

        let mut shell = IdealState::new(resource_group);
        shell.set_num_partitions(partitions);
        shell.set_state_model_def_ref(state_model);
        shell.set_mode(mode);
        match self.store.create(&ideal_state_path, shell.into_record()).await {
            // Lost a declare race; the group exists, which is what was asked.
            Ok(()) | Err(StoreError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        info!(cluster, resource_group, partitions, state_model, "resource group declared");
        Ok(())
    }
}

#[async_trait]
impl<S: PropertyStore> ClusterAdmin for StoreClusterAdmin<S> {
    async fn add_cluster(&self, cluster: &str, overwrite: bool) -> Result<(), AdminError> {
        Self::check_segment(cluster, "cluster name")?;
        let root = Self::cluster_root(cluster);
        if self.store.exists(&root).await? {
            if !overwrite {
                return Err(AdminError::ClusterAlreadyExists(cluster.to_string()));
            }
            self.store.remove_recursive(&root).await?;
        }
        for property_type in PropertyType::ALL {
            let path = property_type.path(cluster, &[]);
            self.store
                .set(&path, Record::new(property_type.as_str()))
                .await?;
        }
        info!(cluster, "cluster namespace created");
        Ok(())
    }

    async fn drop_cluster(&self, cluster: &str) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        self.store
            .remove_recursive(&Self::cluster_root(cluster))
            .await?;
        info!(cluster, "cluster namespace removed");
        Ok(())
    }

    async fn get_clusters(&self) -> Result<Vec<String>, AdminError> {
        Ok(self.store.get_children("/").await?)
    }

    async fn is_cluster_setup(&self, cluster: &str) -> Result<bool, AdminError> {
        Self::check_segment(cluster, "cluster name")?;
        for property_type in PropertyType::ALL {
            if !self.store.exists(&property_type.path(cluster, &[])).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn add_instance(&self, cluster: &str, config: InstanceConfig) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        let instance = config.id().to_string();
        Self::check_segment(&instance, "instance id")?;
        let config_path = PropertyType::Configs.path(cluster, &[&instance]);
        if self.store.exists(&config_path).await? {
            return Err(AdminError::InstanceAlreadyExists {
                cluster: cluster.to_string(),
                instance,
            });
        }
        self.store.create(&config_path, config.into_record()).await?;
        // Skeleton the per-instance namespaces alongside the config.
        for child in ["MESSAGES", "CURRENTSTATES"] {
            let path = PropertyType::Instances.path(cluster, &[&instance, child]);
            self.store.set(&path, Record::new(child)).await?;
        }
        info!(cluster, instance, "instance added");
        Ok(())
    }

    async fn drop_instance(
        &self,
        cluster: &str,
        config: &InstanceConfig,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        let instance = config.id();
        let config_path = self.require_instance(cluster, instance).await?;
        self.store.remove(&config_path).await?;
        self.store
            .remove_recursive(&PropertyType::Instances.path(cluster, &[instance]))
            .await?;
        self.store
            .remove(&PropertyType::LiveInstances.path(cluster, &[instance]))
            .await?;
        info!(cluster, instance, "instance dropped");
        Ok(())
    }

    async fn get_instances_in_cluster(&self, cluster: &str) -> Result<Vec<String>, AdminError> {
        self.require_cluster(cluster).await?;
        Ok(self
            .store
            .get_children(&PropertyType::Configs.path(cluster, &[]))
            .await?)
    }

    async fn enable_instance(
        &self,
        cluster: &str,
        instance: &str,
        enabled: bool,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        let config_path = self.require_instance(cluster, instance).await?;
        let instance_owned = instance.to_string();
        self.store
            .update(
                &config_path,
                Box::new(move |current| {
                    let record = current.unwrap_or_else(|| Record::new(&instance_owned));
                    let mut config = InstanceConfig::from_record(record);
                    config.set_enabled(enabled);
                    config.into_record()
                }),
            )
            .await?;
        info!(cluster, instance, enabled, "instance toggled");
        Ok(())
    }

    async fn get_instance_config(
        &self,
        cluster: &str,
        instance: &str,
    ) -> Result<InstanceConfig, AdminError> {
        self.require_cluster(cluster).await?;
        let config_path = self.require_instance(cluster, instance).await?;
        let record = self.store.get(&config_path).await?;
        Ok(InstanceConfig::from_record(record))
    }

    async fn add_state_model_def(
        &self,
        cluster: &str,
        id: &str,
        definition: StateModelDefinition,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        Self::check_segment(id, "state model id")?;
        let path = PropertyType::StateModelDefs.path(cluster, &[id]);
        match self.store.create(&path, definition.into_record()).await {
            Ok(()) => {
                info!(cluster, id, "state model stored");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => {
                Err(AdminError::StateModelAlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_state_model_defs(&self, cluster: &str) -> Result<Vec<String>, AdminError> {
        self.require_cluster(cluster).await?;
        Ok(self
            .store
            .get_children(&PropertyType::StateModelDefs.path(cluster, &[]))
            .await?)
    }

    async fn get_state_model_def(
        &self,
        cluster: &str,
        id: &str,
    ) -> Result<StateModelDefinition, AdminError> {
        self.require_cluster(cluster).await?;
        let path = PropertyType::StateModelDefs.path(cluster, &[id]);
        match self.store.get(&path).await {
            Ok(record) => Ok(StateModelDefinition::from_record(record)),
            Err(StoreError::NotFound { .. }) => {
                Err(AdminError::StateModelNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn add_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
    ) -> Result<(), AdminError> {
        self.add_resource_group_inner(
            cluster,
            resource_group,
            partitions,
            state_model,
            IdealStateMode::Auto,
        )
        .await
    }

    async fn add_resource_group_with_mode(
        &self,
        cluster: &str,
        resource_group: &str,
        partitions: u32,
        state_model: &str,
        mode: IdealStateMode,
    ) -> Result<(), AdminError> {
        self.add_resource_group_inner(cluster, resource_group, partitions, state_model, mode)
            .await
    }

    async fn get_resource_groups_in_cluster(
        &self,
        cluster: &str,
    ) -> Result<Vec<String>, AdminError> {
        self.require_cluster(cluster).await?;
        Ok(self
            .store
            .get_children(&PropertyType::IdealStates.path(cluster, &[]))
            .await?)
    }

    async fn set_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
        ideal_state: IdealState,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        let path = PropertyType::IdealStates.path(cluster, &[resource_group]);
        self.store.set(&path, ideal_state.into_record()).await?;
        Ok(())
    }

    async fn get_resource_group_ideal_state(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<IdealState, AdminError> {
        self.require_cluster(cluster).await?;
        let path = PropertyType::IdealStates.path(cluster, &[resource_group]);
        match self.store.get(&path).await {
            Ok(record) => Ok(IdealState::from_record(record)),
            Err(StoreError::NotFound { .. }) => Err(AdminError::ResourceGroupNotFound(
                resource_group.to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_resource_group_external_view(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<Option<ExternalView>, AdminError> {
        self.require_cluster(cluster).await?;
        let path = PropertyType::ExternalView.path(cluster, &[resource_group]);
        match self.store.get(&path).await {
            Ok(record) => Ok(Some(ExternalView::from_record(record))),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_resource_group(
        &self,
        cluster: &str,
        resource_group: &str,
    ) -> Result<(), AdminError> {
        self.require_cluster(cluster).await?;
        let ideal_state_path = PropertyType::IdealStates.path(cluster, &[resource_group]);
        if !self.store.exists(&ideal_state_path).await? {
            return Err(AdminError::ResourceGroupNotFound(resource_group.to_string()));
        }
        self.store.remove_recursive(&ideal_state_path).await?;
        self.store
            .remove_recursive(&PropertyType::ExternalView.path(cluster, &[resource_group]))
            .await?;
        info!(cluster, resource_group, "resource group dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use shoal_record::{JsonRecordComparator, JsonRecordSerializer};
    use shoal_store_file::FilePropertyStore;

    async fn new_admin(dir: &std::path::Path) -> StoreClusterAdmin<FilePropertyStore> {
        let store = FilePropertyStore::open(
            dir,
            Arc::new(JsonRecordSerializer),
            Arc::new(JsonRecordComparator),
        )
        .await
        .unwrap();
        StoreClusterAdmin::new(store)
    }

    #[tokio::test]
    async fn test_add_cluster_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;

        admin.add_cluster("C", true).await.unwrap();
        assert!(admin.is_cluster_setup("C").await.unwrap());
        admin.add_cluster("C", true).await.unwrap();
        assert!(admin.is_cluster_setup("C").await.unwrap());

        assert!(!admin.get_clusters().await.unwrap().is_empty());

        assert!(matches!(
            admin.add_cluster("C", false).await,
            Err(AdminError::ClusterAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_instance_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;
        admin.add_cluster("C", true).await.unwrap();

        let config = InstanceConfig::new("host1", 9999);
        admin.add_instance("C", config.clone()).await.unwrap();
        admin.enable_instance("C", "host1_9999", true).await.unwrap();
        let instance_path = PropertyType::Instances.path("C", &["host1_9999"]);
        assert!(admin.store().exists(&instance_path).await.unwrap());

        assert!(matches!(
            admin.add_instance("C", config.clone()).await,
            Err(AdminError::InstanceAlreadyExists { .. })
        ));

        let read = admin.get_instance_config("C", "host1_9999").await.unwrap();
        assert_eq!(read.id(), "host1_9999");

        admin.drop_instance("C", &config).await.unwrap();
        assert!(matches!(
            admin.get_instance_config("C", "host1_9999").await,
            Err(AdminError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            admin.drop_instance("C", &config).await,
            Err(AdminError::InstanceNotFound { .. })
        ));
        assert!(matches!(
            admin.enable_instance("C", "host1_9999", false).await,
            Err(AdminError::InstanceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_enable_toggles_config_flag() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;
        admin.add_cluster("C", true).await.unwrap();
        admin
            .add_instance("C", InstanceConfig::new("host1", 9999))
            .await
            .unwrap();

        admin.enable_instance("C", "host1_9999", false).await.unwrap();
        assert!(!admin
            .get_instance_config("C", "host1_9999")
            .await
            .unwrap()
            .enabled());
        admin.enable_instance("C", "host1_9999", true).await.unwrap();
        assert!(admin
            .get_instance_config("C", "host1_9999")
            .await
            .unwrap()
            .enabled());
    }

    #[tokio::test]
    async fn test_state_models_and_resource_groups() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;
        admin.add_cluster("C", true).await.unwrap();

        admin
            .add_state_model_def("C", "id1", StateModelDefinition::new("id1"))
            .await
            .unwrap();
        assert!(matches!(
            admin
                .add_state_model_def("C", "id1", StateModelDefinition::new("id1"))
                .await,
            Err(AdminError::StateModelAlreadyExists(_))
        ));
        assert_eq!(admin.get_state_model_defs("C").await.unwrap(), vec!["id1"]);

        // Referential integrity, with no partial creation.
        assert!(matches!(
            admin.add_resource_group("C", "R", 10, "missing").await,
            Err(AdminError::StateModelNotFound(_))
        ));
        assert!(admin
            .get_resource_groups_in_cluster("C")
            .await
            .unwrap()
            .is_empty());

        admin.add_resource_group("C", "R", 10, "id1").await.unwrap();
        assert_eq!(
            admin.get_resource_groups_in_cluster("C").await.unwrap(),
            vec!["R"]
        );

        // Duplicate declaration is an idempotent no-op.
        admin.add_resource_group("C", "R", 10, "id1").await.unwrap();
        assert_eq!(
            admin.get_resource_groups_in_cluster("C").await.unwrap(),
            vec!["R"]
        );

        assert!(admin
            .get_resource_group_external_view("C", "R")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_ideal_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;
        admin.add_cluster("C", true).await.unwrap();
        admin
            .add_state_model_def("C", "id1", StateModelDefinition::new("id1"))
            .await
            .unwrap();
        admin.add_resource_group("C", "R", 4, "id1").await.unwrap();

        let shell = admin.get_resource_group_ideal_state("C", "R").await.unwrap();
        assert_eq!(shell.num_partitions(), Some(4));
        assert_eq!(shell.state_model_def_ref(), Some("id1"));
        assert_eq!(shell.mode(), IdealStateMode::Auto);

        let mut ideal_state = shell;
        ideal_state.set_preference_list("R_0", vec!["host1_9999".to_string()]);
        admin
            .set_resource_group_ideal_state("C", "R", ideal_state)
            .await
            .unwrap();
        let read = admin.get_resource_group_ideal_state("C", "R").await.unwrap();
        assert_eq!(read.preference_list("R_0").unwrap(), ["host1_9999".to_string()]);

        admin.drop_resource_group("C", "R").await.unwrap();
        assert!(matches!(
            admin.get_resource_group_ideal_state("C", "R").await,
            Err(AdminError::ResourceGroupNotFound(_))
        ));
        assert!(matches!(
            admin.drop_resource_group("C", "R").await,
            Err(AdminError::ResourceGroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_require_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;

        assert!(matches!(
            admin
                .add_instance("nowhere", InstanceConfig::new("host1", 9999))
                .await,
            Err(AdminError::ClusterNotFound(_))
        ));
        assert!(matches!(
            admin.get_resource_groups_in_cluster("nowhere").await,
            Err(AdminError::ClusterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;

        assert!(matches!(
            admin.add_cluster("", true).await,
            Err(AdminError::InvalidArgument(_))
        ));
        assert!(matches!(
            admin.add_cluster("a.b", true).await,
            Err(AdminError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_cluster_removes_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let admin = new_admin(dir.path()).await;
        admin.add_cluster("C", true).await.unwrap();
        admin.drop_cluster("C").await.unwrap();
        assert!(!admin.is_cluster_setup("C").await.unwrap());
        assert!(matches!(
            admin.drop_cluster("C").await,
            Err(AdminError::ClusterNotFound(_))
        ));
    }
}
