//! The session layer binding one process to a cluster namespace.
//!
//! A [`ClusterManager`] handle is fixed at construction to a cluster, an
//! instance id, and a role. `connect()` establishes a session: it
//! publishes the instance's liveness lease and, for a controller over a
//! backend with leader election, contends for the leader seat.
//! Reconnecting rotates the session id. Typed listeners registered on a
//! connected handle are primed with the current snapshot before the
//! registration call returns, then follow committed changes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod listener;
mod messaging;

pub use error::ManagerError;
pub use listener::{
    ConfigChangeListener, ControllerChangeListener, CurrentStateChangeListener,
    ExternalViewChangeListener, IdealStateChangeListener, ListenerId, LiveInstanceChangeListener,
};
pub use messaging::ClusterMessagingService;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use shoal_admin::{ClusterAdmin, RestrictedClusterAdmin, StoreClusterAdmin};
use shoal_model::{
    ExternalView, IdealState, InstanceConfig, LEADER_NODE, LiveInstance, PropertyType,
    is_valid_segment,
};
use shoal_record::Record;
use shoal_store::{
    PropertyChange, PropertyChangeListener, PropertyStore, StoreError, SubscriptionId,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// The fixed role of a manager handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceType {
    /// Computes placement and owns the controller namespace.
    Controller,

    /// Hosts partition replicas and reports current state.
    Participant,
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Controller => "CONTROLLER",
            Self::Participant => "PARTICIPANT",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Unconnected,
    Connected,
    Disconnected,
}

struct SessionState {
    phase: Phase,
    session_id: Option<String>,
    is_leader: bool,
}

enum ListenerTarget {
    IdealState(Arc<dyn IdealStateChangeListener>),
    LiveInstance(Arc<dyn LiveInstanceChangeListener>),
    CurrentState {
        instance: String,
        listener: Arc<dyn CurrentStateChangeListener>,
    },
    Config(Arc<dyn ConfigChangeListener>),
    ExternalView(Arc<dyn ExternalViewChangeListener>),
    Controller(Arc<dyn ControllerChangeListener>),
}

/// Translates raw store notifications into typed snapshot deliveries.
///
/// Every store event under the watched prefix triggers one wholesale
/// re-read of the scope; the store serializes events per subscription, so
/// snapshots for one registration arrive in commit order.
struct ListenerBridge<S: PropertyStore> {
    store: S,
    cluster: String,
    prefix: String,
    target: ListenerTarget,
    last_notification: Arc<AtomicI64>,
}

impl<S: PropertyStore> ListenerBridge<S> {
    async fn snapshot_records(&self) -> Result<Vec<Record>, StoreError> {
        let children = match self.store.get_children(&self.prefix).await {
            Ok(children) => children,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for child in children {
            match self.store.get(&format!("{}/{child}", self.prefix)).await {
                Ok(record) => records.push(record),
                // Bare namespace node, or a delete racing the snapshot.
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    async fn dispatch(&self) -> Result<(), StoreError> {
        match &self.target {
            ListenerTarget::IdealState(listener) => {
                let ideal_states = self
                    .snapshot_records()
                    .await?
                    .into_iter()
                    .map(IdealState::from_record)
                    .collect();
                listener.on_ideal_state_change(ideal_states).await;
            }
            ListenerTarget::LiveInstance(listener) => {
                let live_instances = self
                    .snapshot_records()
                    .await?
                    .into_iter()
                    .map(LiveInstance::from_record)
                    .collect();
                listener.on_live_instance_change(live_instances).await;
            }
            ListenerTarget::CurrentState { instance, listener } => {
                let current_states = self.snapshot_records().await?;
                listener
                    .on_current_state_change(instance, current_states)
                    .await;
            }
            ListenerTarget::Config(listener) => {
                let configs = self
                    .snapshot_records()
                    .await?
                    .into_iter()
                    .map(InstanceConfig::from_record)
                    .collect();
                listener.on_config_change(configs).await;
            }
            ListenerTarget::ExternalView(listener) => {
                let external_views = self
                    .snapshot_records()
                    .await?
                    .into_iter()
                    .map(ExternalView::from_record)
                    .collect();
                listener.on_external_view_change(external_views).await;
            }
            ListenerTarget::Controller(listener) => {
                let leader_path = PropertyType::Controller.path(&self.cluster, &[LEADER_NODE]);
                let leader = match self.store.get(&leader_path).await {
                    Ok(record) => Some(LiveInstance::from_record(record)),
                    Err(StoreError::NotFound { .. }) => None,
                    Err(e) => return Err(e),
                };
                listener.on_controller_change(leader).await;
            }
        }
        Ok(())
    }

    async fn fire(&self) {
        let mut result = self.dispatch().await;
        if let Err(e) = &result {
            warn!(prefix = %self.prefix, error = %e, "listener snapshot read failed, retrying");
            result = self.dispatch().await;
        }
        match result {
            Ok(()) => {
                self.last_notification
                    .fetch_max(Utc::now().timestamp_millis(), Ordering::SeqCst);
            }
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "listener snapshot delivery dropped");
            }
        }
    }
}

#[async_trait]
impl<S: PropertyStore> PropertyChangeListener for ListenerBridge<S> {
    async fn on_change(&self, _change: PropertyChange) {
        self.fire().await;
    }
}

struct Registration<S: PropertyStore> {
    prefix: String,
    bridge: Arc<ListenerBridge<S>>,
    subscription: SubscriptionId,
}

struct Inner<S: PropertyStore> {
    store: S,
    cluster: String,
    instance: String,
    instance_type: InstanceType,
    session: Mutex<SessionState>,
    registrations: Mutex<HashMap<u64, Registration<S>>>,
    next_listener_id: AtomicU64,
    last_notification: Arc<AtomicI64>,
}

/// One process's handle on a cluster.
///
/// Cheap to clone; clones share the session, the listener registry, and
/// the notification clock.
#[derive(Clone)]
pub struct ClusterManager<S: PropertyStore> {
    inner: Arc<Inner<S>>,
}

impl<S: PropertyStore> ClusterManager<S> {
    /// Creates an unconnected handle fixed to a cluster, instance, and
    /// role.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidArgument`] when either name is unusable as
    /// a path segment.
    pub fn new(
        store: S,
        cluster: &str,
        instance: &str,
        instance_type: InstanceType,
    ) -> Result<Self, ManagerError> {
        if !is_valid_segment(cluster) {
            return Err(ManagerError::InvalidArgument(format!(
                "bad cluster name: {cluster:?}"
            )));
        }
        if !is_valid_segment(instance) {
            return Err(ManagerError::InvalidArgument(format!(
                "bad instance id: {instance:?}"
            )));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                cluster: cluster.to_string(),
                instance: instance.to_string(),
                instance_type,
                session: Mutex::new(SessionState {
                    phase: Phase::Unconnected,
                    session_id: None,
                    is_leader: false,
                }),
                registrations: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
                last_notification: Arc::new(AtomicI64::new(0)),
            }),
        })
    }

    /// The cluster this handle is fixed to.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.inner.cluster
    }

    /// The instance id this handle is fixed to.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.inner.instance
    }

    /// The role this handle is fixed to.
    #[must_use]
    pub fn instance_type(&self) -> InstanceType {
        self.inner.instance_type
    }

    /// The current session id, or `None` before the first `connect()`.
    /// Retained across `disconnect()`.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.session.lock().await.session_id.clone()
    }

    /// Whether the handle currently holds a session.
    pub async fn is_connected(&self) -> bool {
        self.inner.session.lock().await.phase == Phase::Connected
    }

    /// Whether this handle won the leader seat during `connect()`.
    pub async fn is_leader(&self) -> bool {
        self.inner.session.lock().await.is_leader
    }

    /// Epoch milliseconds of the most recent listener delivery. Zero
    /// until the first delivery.
    #[must_use]
    pub fn last_notification_time(&self) -> i64 {
        self.inner.last_notification.load(Ordering::SeqCst)
    }

    fn live_backend(&self) -> bool {
        self.inner.store.capabilities().ephemeral
    }

    fn live_instance_path(&self) -> String {
        PropertyType::LiveInstances.path(&self.inner.cluster, &[&self.inner.instance])
    }

    fn leader_path(&self) -> String {
        PropertyType::Controller.path(&self.inner.cluster, &[LEADER_NODE])
    }

    /// Establishes a session, publishing this instance's liveness lease
    /// and contending for the leader seat when the role and backend call
    /// for it. A fresh session id is rotated on every transition into
    /// the connected state; connecting a connected handle is a no-op.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidArgument`] when the cluster namespace has
    /// not been set up, or a [`ManagerError::Store`] from the backend.
    pub async fn connect(&self) -> Result<(), ManagerError> {
        let mut session = self.inner.session.lock().await;
        if session.phase == Phase::Connected {
            return Ok(());
        }

        let cluster = &self.inner.cluster;
        if !self.inner.store.exists(&format!("/{cluster}")).await? {
            return Err(ManagerError::InvalidArgument(format!(
                "cluster not set up: {cluster}"
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let lease = LiveInstance::new(&self.inner.instance, &session_id, now);
        let live_path = self.live_instance_path();
        match self
            .inner
            .store
            .create_ephemeral(&live_path, lease.clone().into_record())
            .await
        {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                // Stale lease left by an earlier session of this instance.
                self.inner.store.remove(&live_path).await?;
                self.inner
                    .store
                    .create_ephemeral(&live_path, lease.into_record())
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut is_leader = false;
        if self.inner.instance_type == InstanceType::Controller
            && self.inner.store.capabilities().leader_election
        {
            let claim = LiveInstance::new(&self.inner.instance, &session_id, now);
            match self
                .inner
                .store
                .create_ephemeral(&self.leader_path(), claim.into_record())
                .await
            {
                Ok(()) => {
                    is_leader = true;
                    info!(cluster, instance = %self.inner.instance, "acquired cluster leadership");
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    info!(cluster, instance = %self.inner.instance, "leader seat taken, standing by");
                }
                Err(e) => return Err(e.into()),
            }
        }

        session.phase = Phase::Connected;
        session.session_id = Some(session_id.clone());
        session.is_leader = is_leader;
        drop(session);

        // Re-arm any surviving registrations against the new session.
        let mut registrations = self.inner.registrations.lock().await;
        for registration in registrations.values_mut() {
            self.inner.store.unsubscribe(registration.subscription).await;
            registration.subscription = self
                .inner
                .store
                .subscribe(&registration.prefix, registration.bridge.clone())
                .await?;
            registration.bridge.fire().await;
        }
        drop(registrations);

        info!(
            cluster,
            instance = %self.inner.instance,
            role = %self.inner.instance_type,
            session = %session_id,
            "connected"
        );
        Ok(())
    }

    /// Ends the session: tears down all listener registrations and
    /// removes this handle's session artifacts. A callback already in
    /// flight may finish; nothing fires afterward. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ManagerError> {
        let mut session = self.inner.session.lock().await;
        if session.phase != Phase::Connected {
            return Ok(());
        }

        let mut registrations = self.inner.registrations.lock().await;
        for (_, registration) in registrations.drain() {
            self.inner.store.unsubscribe(registration.subscription).await;
        }
        drop(registrations);

        match self.inner.store.remove(&self.live_instance_path()).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        if session.is_leader {
            match self.inner.store.remove(&self.leader_path()).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        session.phase = Phase::Disconnected;
        session.is_leader = false;
        info!(cluster = %self.inner.cluster, instance = %self.inner.instance, "disconnected");
        Ok(())
    }

    /// Watches the cluster's ideal states.
    pub async fn add_ideal_state_change_listener(
        &self,
        listener: Arc<dyn IdealStateChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        let prefix = PropertyType::IdealStates.path(&self.inner.cluster, &[]);
        self.register(prefix, ListenerTarget::IdealState(listener))
            .await
    }

    /// Watches the cluster's live instances.
    pub async fn add_live_instance_change_listener(
        &self,
        listener: Arc<dyn LiveInstanceChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        let prefix = PropertyType::LiveInstances.path(&self.inner.cluster, &[]);
        self.register(prefix, ListenerTarget::LiveInstance(listener))
            .await
    }

    /// Watches one instance's current-state reports for one session.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidArgument`] when either argument is empty.
    pub async fn add_current_state_change_listener(
        &self,
        instance: &str,
        session_id: &str,
        listener: Arc<dyn CurrentStateChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        if instance.is_empty() || session_id.is_empty() {
            return Err(ManagerError::InvalidArgument(
                "instance and session id must be non-empty".to_string(),
            ));
        }
        let prefix = PropertyType::Instances.path(
            &self.inner.cluster,
            &[instance, PropertyType::CurrentStates.as_str(), session_id],
        );
        self.register(
            prefix,
            ListenerTarget::CurrentState {
                instance: instance.to_string(),
                listener,
            },
        )
        .await
    }

    /// Watches instance configurations. Controller-only, live backend
    /// only.
    pub async fn add_config_change_listener(
        &self,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        self.require_controller_kind("add_config_change_listener")?;
        let prefix = PropertyType::Configs.path(&self.inner.cluster, &[]);
        self.register(prefix, ListenerTarget::Config(listener)).await
    }

    /// Watches computed external views. Controller-only, live backend
    /// only.
    pub async fn add_external_view_change_listener(
        &self,
        listener: Arc<dyn ExternalViewChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        self.require_controller_kind("add_external_view_change_listener")?;
        let prefix = PropertyType::ExternalView.path(&self.inner.cluster, &[]);
        self.register(prefix, ListenerTarget::ExternalView(listener))
            .await
    }

    /// Watches the controller namespace. Controller-only, live backend
    /// only.
    pub async fn add_controller_listener(
        &self,
        listener: Arc<dyn ControllerChangeListener>,
    ) -> Result<ListenerId, ManagerError> {
        self.require_controller_kind("add_controller_listener")?;
        let prefix = PropertyType::Controller.path(&self.inner.cluster, &[]);
        self.register(prefix, ListenerTarget::Controller(listener))
            .await
    }

    /// Drops a registration. Returns `false` for an id never registered
    /// or already removed.
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.inner.registrations.lock().await.remove(&id.0);
        match removed {
            Some(registration) => {
                self.inner.store.unsubscribe(registration.subscription).await;
                true
            }
            None => false,
        }
    }

    /// The messaging collaborator bound to this handle.
    #[must_use]
    pub fn messaging_service(&self) -> ClusterMessagingService<S> {
        ClusterMessagingService::new(
            self.inner.store.clone(),
            &self.inner.cluster,
            &self.inner.instance,
        )
    }

    /// The management tool bound to the same backend: the full tool over
    /// a live backend, the capability-restricted tool otherwise.
    #[must_use]
    pub fn cluster_management_tool(&self) -> Box<dyn ClusterAdmin> {
        if self.live_backend() {
            Box::new(StoreClusterAdmin::new(self.inner.store.clone()))
        } else {
            Box::new(RestrictedClusterAdmin::new(self.inner.store.clone()))
        }
    }

    /// The cluster's free-form user property space, or `None` on a
    /// backend without a live coordination service.
    #[must_use]
    pub fn property_store(&self) -> Option<UserPropertyStore<S>> {
        if self.live_backend() {
            Some(UserPropertyStore {
                store: self.inner.store.clone(),
                root: PropertyType::PropertyStore.path(&self.inner.cluster, &[]),
            })
        } else {
            None
        }
    }

    fn require_controller_kind(&self, op: &'static str) -> Result<(), ManagerError> {
        if self.inner.instance_type != InstanceType::Controller {
            return Err(ManagerError::Unsupported(op));
        }
        if !self.live_backend() {
            return Err(ManagerError::Unsupported(op));
        }
        Ok(())
    }

    async fn register(
        &self,
        prefix: String,
        target: ListenerTarget,
    ) -> Result<ListenerId, ManagerError> {
        // Held until the registration is inserted, so a concurrent
        // disconnect cannot drain the registry in between and leave a
        // live subscription behind.
        let session = self.inner.session.lock().await;
        match session.phase {
            Phase::Connected => {}
            Phase::Unconnected => return Err(ManagerError::NotConnected),
            Phase::Disconnected => return Err(ManagerError::Disconnected),
        }
        let bridge = Arc::new(ListenerBridge {
            store: self.inner.store.clone(),
            cluster: self.inner.cluster.clone(),
            prefix: prefix.clone(),
            target,
            last_notification: self.inner.last_notification.clone(),
        });
        let subscription = self
            .inner
            .store
            .subscribe(&prefix, bridge.clone())
            .await?;
        // Prime with the current snapshot before handing back the id, so
        // callers never race their own first read against a change.
        bridge.fire().await;
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.registrations.lock().await.insert(
            id,
            Registration {
                prefix,
                bridge,
                subscription,
            },
        );
        drop(session);
        Ok(ListenerId(id))
    }
}

/// The free-form user property space of one cluster, addressed with
/// absolute paths relative to its root.
#[derive(Clone, Debug)]
pub struct UserPropertyStore<S: PropertyStore> {
    store: S,
    root: String,
}

impl<S: PropertyStore> UserPropertyStore<S> {
    fn resolve(&self, path: &str) -> Result<String, StoreError> {
        shoal_store::path::split(path)?;
        Ok(format!("{}{path}", self.root))
    }

    /// Returns true if a record exists at the path.
    pub async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.store.exists(&self.resolve(path)?).await
    }

    /// Upserts the record at the path.
    pub async fn set(&self, path: &str, record: Record) -> Result<(), StoreError> {
        self.store.set(&self.resolve(path)?, record).await
    }

    /// Reads the record at the path.
    pub async fn get(&self, path: &str) -> Result<Record, StoreError> {
        self.store.get(&self.resolve(path)?).await
    }

    /// Removes the node at the path.
    pub async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.store.remove(&self.resolve(path)?).await
    }

    /// The sorted names of the path's direct children.
    pub async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.store.get_children(&self.resolve(path)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use shoal_model::Message;
    use shoal_record::{JsonRecordComparator, JsonRecordSerializer};
    use shoal_store_file::FilePropertyStore;
    use tokio::time::{sleep, timeout};

    async fn new_store(dir: &std::path::Path) -> FilePropertyStore {
        FilePropertyStore::open(
            dir,
            Arc::new(JsonRecordSerializer),
            Arc::new(JsonRecordComparator),
        )
        .await
        .unwrap()
    }

    async fn setup_cluster(store: &FilePropertyStore) {
        StoreClusterAdmin::new(store.clone())
            .add_cluster("C", true)
            .await
            .unwrap();
    }

    #[derive(Default)]
    struct RecordingListener {
        fires: AtomicUsize,
        last_count: AtomicUsize,
    }

    impl RecordingListener {
        async fn wait_for_fires(&self, at_least: usize) {
            timeout(Duration::from_secs(5), async {
                while self.fires.load(Ordering::SeqCst) < at_least {
                    sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
        }

        fn record(&self, count: usize) {
            self.last_count.store(count, Ordering::SeqCst);
            self.fires.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl IdealStateChangeListener for RecordingListener {
        async fn on_ideal_state_change(&self, ideal_states: Vec<IdealState>) {
            self.record(ideal_states.len());
        }
    }

    #[async_trait]
    impl LiveInstanceChangeListener for RecordingListener {
        async fn on_live_instance_change(&self, live_instances: Vec<LiveInstance>) {
            self.record(live_instances.len());
        }
    }

    #[async_trait]
    impl CurrentStateChangeListener for RecordingListener {
        async fn on_current_state_change(&self, instance: &str, current_states: Vec<Record>) {
            assert_eq!(instance, "host1_9999");
            self.record(current_states.len());
        }
    }

    #[async_trait]
    impl ConfigChangeListener for RecordingListener {
        async fn on_config_change(&self, configs: Vec<InstanceConfig>) {
            self.record(configs.len());
        }
    }

    #[async_trait]
    impl ExternalViewChangeListener for RecordingListener {
        async fn on_external_view_change(&self, external_views: Vec<ExternalView>) {
            self.record(external_views.len());
        }
    }

    #[async_trait]
    impl ControllerChangeListener for RecordingListener {
        async fn on_controller_change(&self, leader: Option<LiveInstance>) {
            self.record(usize::from(leader.is_some()));
        }
    }

    #[tokio::test]
    async fn test_reconnect_rotates_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store.clone(), "C", "host1_9999", InstanceType::Participant)
                .unwrap();

        assert!(manager.session_id().await.is_none());
        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);
        let first = manager.session_id().await.unwrap();

        let live_path = PropertyType::LiveInstances.path("C", &["host1_9999"]);
        let lease = LiveInstance::from_record(store.get(&live_path).await.unwrap());
        assert_eq!(lease.session_id(), Some(first.as_str()));

        manager.disconnect().await.unwrap();
        assert!(!manager.is_connected().await);
        assert!(!store.exists(&live_path).await.unwrap());

        manager.connect().await.unwrap();
        let second = manager.session_id().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.cluster_name(), "C");
        assert_eq!(manager.instance_type(), InstanceType::Participant);

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();

        manager.disconnect().await.unwrap();
        manager.connect().await.unwrap();
        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_requires_cluster_setup() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();

        assert!(matches!(
            manager.connect().await,
            Err(ManagerError::InvalidArgument(_))
        ));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_listener_is_primed_before_registration_returns() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let admin = StoreClusterAdmin::new(store.clone());
        admin
            .add_state_model_def("C", "id1", shoal_model::StateModelDefinition::new("id1"))
            .await
            .unwrap();
        admin.add_resource_group("C", "R", 10, "id1").await.unwrap();
        admin.add_resource_group("C", "R2", 4, "id1").await.unwrap();

        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();
        assert_eq!(manager.last_notification_time(), 0);

        let listener = Arc::new(RecordingListener::default());
        manager
            .add_ideal_state_change_listener(listener.clone())
            .await
            .unwrap();

        assert!(listener.fires.load(Ordering::SeqCst) >= 1);
        assert_eq!(listener.last_count.load(Ordering::SeqCst), 2);
        assert!(manager.last_notification_time() > 0);

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_ideal_state_listener_follows_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let admin = StoreClusterAdmin::new(store.clone());
        admin
            .add_state_model_def("C", "id1", shoal_model::StateModelDefinition::new("id1"))
            .await
            .unwrap();

        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        manager
            .add_ideal_state_change_listener(listener.clone())
            .await
            .unwrap();
        let primed = listener.fires.load(Ordering::SeqCst);

        admin.add_resource_group("C", "R", 10, "id1").await.unwrap();
        listener.wait_for_fires(primed + 1).await;
        assert_eq!(listener.last_count.load(Ordering::SeqCst), 1);

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_live_instance_listener_sees_peers() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;

        let observer = ClusterManager::new(
            store.clone(),
            "C",
            "observer_1000",
            InstanceType::Participant,
        )
        .unwrap();
        observer.connect().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        observer
            .add_live_instance_change_listener(listener.clone())
            .await
            .unwrap();
        // Primed with at least the observer's own lease.
        assert!(listener.last_count.load(Ordering::SeqCst) >= 1);
        let primed = listener.fires.load(Ordering::SeqCst);

        let peer =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        peer.connect().await.unwrap();
        listener.wait_for_fires(primed + 1).await;
        assert_eq!(listener.last_count.load(Ordering::SeqCst), 2);

        peer.disconnect().await.unwrap();
        observer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_current_state_listener_validates_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        assert!(matches!(
            manager
                .add_current_state_change_listener("", "s1", listener.clone())
                .await,
            Err(ManagerError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager
                .add_current_state_change_listener("host1_9999", "", listener)
                .await,
            Err(ManagerError::InvalidArgument(_))
        ));

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_current_state_listener_follows_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store.clone(), "C", "host1_9999", InstanceType::Participant)
                .unwrap();
        manager.connect().await.unwrap();
        let session = manager.session_id().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        manager
            .add_current_state_change_listener("host1_9999", &session, listener.clone())
            .await
            .unwrap();
        let primed = listener.fires.load(Ordering::SeqCst);

        let report_path = PropertyType::Instances.path(
            "C",
            &["host1_9999", PropertyType::CurrentStates.as_str(), &session, "R"],
        );
        store.set(&report_path, Record::new("R")).await.unwrap();
        listener.wait_for_fires(primed + 1).await;
        assert_eq!(listener.last_count.load(Ordering::SeqCst), 1);

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_participant_rejects_controller_only_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        assert!(matches!(
            manager.add_config_change_listener(listener.clone()).await,
            Err(ManagerError::Unsupported(_))
        ));
        assert!(matches!(
            manager
                .add_external_view_change_listener(listener.clone())
                .await,
            Err(ManagerError::Unsupported(_))
        ));
        assert!(matches!(
            manager.add_controller_listener(listener).await,
            Err(ManagerError::Unsupported(_))
        ));

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_backend_rejects_controller_kinds_for_any_role() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager = ClusterManager::new(
            store.clone(),
            "C",
            "controller_2000",
            InstanceType::Controller,
        )
        .unwrap();
        manager.connect().await.unwrap();

        // No leader contention without leader election on the backend.
        assert!(!manager.is_leader().await);
        let leader_path = PropertyType::Controller.path("C", &[LEADER_NODE]);
        assert!(!store.exists(&leader_path).await.unwrap());

        let listener = Arc::new(RecordingListener::default());
        assert!(matches!(
            manager.add_config_change_listener(listener.clone()).await,
            Err(ManagerError::Unsupported(_))
        ));
        assert!(matches!(
            manager
                .add_external_view_change_listener(listener.clone())
                .await,
            Err(ManagerError::Unsupported(_))
        ));
        assert!(matches!(
            manager.add_controller_listener(listener).await,
            Err(ManagerError::Unsupported(_))
        ));

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_requires_connection() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();

        let listener = Arc::new(RecordingListener::default());
        assert!(matches!(
            manager
                .add_ideal_state_change_listener(listener.clone())
                .await,
            Err(ManagerError::NotConnected)
        ));

        manager.connect().await.unwrap();
        let id = manager
            .add_ideal_state_change_listener(listener.clone())
            .await
            .unwrap();
        manager.disconnect().await.unwrap();

        // Disconnect cleared the registry.
        assert!(!manager.remove_listener(id).await);
        assert!(matches!(
            manager.add_ideal_state_change_listener(listener).await,
            Err(ManagerError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_remove_listener_reports_membership() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        assert!(!manager.remove_listener(ListenerId(42)).await);

        let listener = Arc::new(RecordingListener::default());
        let id = manager
            .add_ideal_state_change_listener(listener)
            .await
            .unwrap();
        assert!(manager.remove_listener(id).await);
        assert!(!manager.remove_listener(id).await);

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_handle_is_capability_restricted() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        assert!(manager.property_store().is_none());

        let tool = manager.cluster_management_tool();
        assert!(tool.is_cluster_setup("C").await.unwrap());
        assert!(matches!(
            tool.get_clusters().await,
            Err(shoal_admin::AdminError::Unsupported(_))
        ));

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_messaging_drop_off_and_pickup() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();
        manager.connect().await.unwrap();

        let messaging = manager.messaging_service();
        let id = Uuid::new_v4().to_string();
        messaging
            .send(Message::new(&id, "host1_9999", "host2_1111", "STATE_TRANSITION"))
            .await
            .unwrap();

        let pending = messaging.pending("host2_1111").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].msg_type(), Some("STATE_TRANSITION"));
        assert_eq!(pending[0].from_instance(), Some("host1_9999"));

        messaging.acknowledge("host2_1111", &id).await.unwrap();
        assert!(messaging.pending("host2_1111").await.unwrap().is_empty());

        assert!(matches!(
            messaging
                .send(Message::new("m1", "host1_9999", "bad.addr", "NOOP"))
                .await,
            Err(ManagerError::InvalidArgument(_))
        ));

        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_never_survives_concurrent_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let store = new_store(dir.path()).await;
        setup_cluster(&store).await;
        let manager =
            ClusterManager::new(store, "C", "host1_9999", InstanceType::Participant).unwrap();

        for _ in 0..50 {
            manager.connect().await.unwrap();

            let listener = Arc::new(RecordingListener::default());
            let registrant = manager.clone();
            let adding = tokio::spawn(async move {
                registrant.add_ideal_state_change_listener(listener).await
            });
            let disconnecting = manager.clone();
            let dropping = tokio::spawn(async move { disconnecting.disconnect().await });

            let added = adding.await.unwrap();
            dropping.await.unwrap().unwrap();

            // Whichever side won, nothing may outlive the disconnect.
            if let Ok(id) = added {
                assert!(!manager.remove_listener(id).await);
            }
        }
    }

    #[derive(Clone)]
    struct FlakyStore {
        inner: FilePropertyStore,
        failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PropertyStore for FlakyStore {
        async fn exists(&self, path: &str) -> Result<bool, StoreError> {
            self.inner.exists(path).await
        }

        async fn create(&self, path: &str, record: Record) -> Result<(), StoreError> {
            self.inner.create(path, record).await
        }

        async fn create_ephemeral(&self, path: &str, record: Record) -> Result<(), StoreError> {
            self.inner.create_ephemeral(path, record).await
        }

        async fn set(&self, path: &str, record: Record) -> Result<(), StoreError> {
            self.inner.set(path, record).await
        }

        async fn update(
            &self,
            path: &str,
            updater: shoal_store::Updater,
        ) -> Result<Record, StoreError> {
            self.inner.update(path, updater).await
        }

        async fn get(&self, path: &str) -> Result<Record, StoreError> {
            self.inner.get(path).await
        }

        async fn remove(&self, path: &str) -> Result<(), StoreError> {
            self.inner.remove(path).await
        }

        async fn remove_recursive(&self, path: &str) -> Result<(), StoreError> {
            self.inner.remove_recursive(path).await
        }

        async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::backend("get_children", "injected outage"));
            }
            self.inner.get_children(path).await
        }

        async fn subscribe(
            &self,
            prefix: &str,
            listener: Arc<dyn PropertyChangeListener>,
        ) -> Result<SubscriptionId, StoreError> {
            self.inner.subscribe(prefix, listener).await
        }

        async fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id).await;
        }

        async fn stop(&self) -> Result<(), StoreError> {
            self.inner.stop().await
        }

        fn capabilities(&self) -> shoal_store::StoreCapabilities {
            self.inner.capabilities()
        }
    }

    #[tokio::test]
    async fn test_snapshot_delivery_survives_one_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = new_store(dir.path()).await;
        setup_cluster(&file_store).await;
        let failures = Arc::new(AtomicUsize::new(0));
        let store = FlakyStore {
            inner: file_store,
            failures: failures.clone(),
        };

        let manager = ClusterManager::new(
            store.clone(),
            "C",
            "host1_9999",
            InstanceType::Participant,
        )
        .unwrap();
        manager.connect().await.unwrap();

        let listener = Arc::new(RecordingListener::default());
        manager
            .add_ideal_state_change_listener(listener.clone())
            .await
            .unwrap();
        let primed = listener.fires.load(Ordering::SeqCst);

        failures.store(1, Ordering::SeqCst);
        store
            .set(
                &PropertyType::IdealStates.path("C", &["R"]),
                Record::new("R"),
            )
            .await
            .unwrap();

        // The first snapshot read fails; the retry still delivers.
        listener.wait_for_fires(primed + 1).await;
        assert_eq!(listener.last_count.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        manager.disconnect().await.unwrap();
    }
}
