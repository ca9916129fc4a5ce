//! Property store backed by NATS JetStream KV: the live coordination
//! backend with sessions, ephemeral leases, and pushed change notification.
//!
//! Paths map bijectively onto KV keys (`/a/b` -> `a.b`), which is why path
//! segments may not contain `.`. Durable records live in the main bucket;
//! session-bound records live in a second bucket whose `max_age` is the
//! session TTL. A keeper task re-puts every lease owned by this handle at
//! 80% of the TTL, so the records of a crashed process expire on their own
//! and watchers observe the removal. Record versions are the KV revisions:
//! monotonically increasing per committed write.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::jetstream::kv::{Config as KvConfig, CreateErrorKind, Operation, Store as KvStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use shoal_record::{Record, SharedComparator, SharedSerializer};
use shoal_store::path as store_path;
use shoal_store::{
    ChangeKind, PropertyChange, PropertyChangeListener, PropertyStore, StoreCapabilities,
    StoreError, SubscriptionId, Updater,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Renew leases at 80% of the session TTL to avoid a gap between renewal
/// and expiry.
const RENEWAL_RATIO_OF_SESSION_TTL: f64 = 0.8;

/// Bounded retries for the compare-and-set loop in `update`.
const UPDATE_CAS_ATTEMPTS: usize = 5;

/// Options for configuring a [`NatsPropertyStore`].
pub struct NatsPropertyStoreOptions {
    /// The NATS client to use.
    pub client: Client,

    /// The bucket holding durable records. A sibling `<bucket>-eph` bucket
    /// holds session-bound records.
    pub bucket: String,

    /// How long a session-bound record outlives its last renewal.
    pub session_ttl: Duration,

    /// Whether to persist the buckets to disk.
    pub persist: bool,

    /// Number of replicas for the buckets. At least 3 in production.
    pub num_replicas: usize,

    /// Record codec.
    pub serializer: SharedSerializer,

    /// Comparator for optimistic no-op write detection.
    pub comparator: SharedComparator,
}

struct Inner {
    bucket: String,
    jetstream: JetStreamContext,
    session_ttl: Duration,
    persist: bool,
    num_replicas: usize,
    serializer: SharedSerializer,
    comparator: SharedComparator,
    /// Leases owned by this handle's session, key -> serialized record.
    leases: Mutex<HashMap<String, Bytes>>,
    keeper: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<HashMap<SubscriptionId, Vec<JoinHandle<()>>>>,
    next_subscription: AtomicU64,
    stopped: AtomicBool,
}

/// Live-coordination property store over NATS JetStream KV.
#[derive(Clone)]
pub struct NatsPropertyStore {
    inner: Arc<Inner>,
}

fn path_to_key(path: &str) -> Result<String, StoreError> {
    let segments = store_path::split(path)?;
    Ok(segments.join("."))
}

fn key_to_path(key: &str) -> String {
    let mut path = String::with_capacity(key.len() + 1);
    for segment in key.split('.') {
        path.push('/');
        path.push_str(segment);
    }
    path
}

/// The direct child name under `prefix_key` that `key` belongs to, if any.
fn child_of<'a>(key: &'a str, prefix_key: &str) -> Option<&'a str> {
    let rest = if prefix_key.is_empty() {
        key
    } else {
        key.strip_prefix(prefix_key)?.strip_prefix('.')?
    };
    let child = rest.split('.').next()?;
    (!child.is_empty()).then_some(child)
}

impl NatsPropertyStore {
    /// Creates a new store over the given client and bucket.
    #[must_use]
    pub fn new(
        NatsPropertyStoreOptions {
            client,
            bucket,
            session_ttl,
            persist,
            num_replicas,
            serializer,
            comparator,
        }: NatsPropertyStoreOptions,
    ) -> Self {
        let jetstream = jetstream::new(client);
        Self {
            inner: Arc::new(Inner {
                bucket,
                jetstream,
                session_ttl,
                persist,
                num_replicas,
                serializer,
                comparator,
                leases: Mutex::new(HashMap::new()),
                keeper: Mutex::new(None),
                subscriptions: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    fn storage_type(&self) -> jetstream::stream::StorageType {
        if self.inner.persist {
            jetstream::stream::StorageType::File
        } else {
            jetstream::stream::StorageType::Memory
        }
    }

    async fn main_kv(&self) -> Result<KvStore, StoreError> {
        let config = KvConfig {
            bucket: self.inner.bucket.clone(),
            num_replicas: self.inner.num_replicas,
            storage: self.storage_type(),
            ..Default::default()
        };
        self.inner
            .jetstream
            .create_key_value(config)
            .await
            .map_err(|e| StoreError::backend("create_key_value", e))
    }

    async fn ephemeral_kv(&self) -> Result<KvStore, StoreError> {
        let config = KvConfig {
            bucket: format!("{}-eph", self.inner.bucket),
            max_age: self.inner.session_ttl,
            num_replicas: self.inner.num_replicas,
            storage: self.storage_type(),
            ..Default::default()
        };
        self.inner
            .jetstream
            .create_key_value(config)
            .await
            .map_err(|e| StoreError::backend("create_key_value", e))
    }

    async fn keys_of(&self, kv: &KvStore) -> Result<Vec<String>, StoreError> {
        kv.keys()
            .await
            .map_err(|e| StoreError::backend("keys", e))?
            .try_collect::<Vec<String>>()
            .await
            .map_err(|e| StoreError::backend("keys", e))
    }

    fn decode(&self, bytes: &[u8], revision: u64) -> Result<Record, StoreError> {
        let mut record = self.inner.serializer.deserialize(bytes)?;
        record.version = i64::try_from(revision).unwrap_or(i64::MAX);
        Ok(record)
    }

    /// Starts the lease keeper if it is not already running.
    async fn ensure_keeper(&self) {
        let mut keeper = self.inner.keeper.lock().await;
        if keeper.is_some() {
            return;
        }
        let store = self.clone();
        let interval = self.inner.session_ttl.mul_f64(RENEWAL_RATIO_OF_SESSION_TTL);
        *keeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let leases: Vec<(String, Bytes)> = store
                    .inner
                    .leases
                    .lock()
                    .await
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if leases.is_empty() {
                    continue;
                }
                match store.ephemeral_kv().await {
                    Ok(kv) => {
                        for (key, bytes) in leases {
                            if let Err(e) = kv.put(key.clone(), bytes).await {
                                warn!(key, error = %e, "lease renewal failed");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "lease renewal could not reach bucket"),
                }
            }
        }));
    }

    fn check_running(&self) -> Result<(), StoreError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        Ok(())
    }

    fn spawn_watcher(
        &self,
        kv: KvStore,
        pattern: String,
        listener: Arc<dyn PropertyChangeListener>,
    ) -> JoinHandle<()> {
        let serializer = self.inner.serializer.clone();
        tokio::spawn(async move {
            let mut watch = match kv.watch(pattern.as_str()).await {
                Ok(watch) => watch,
                Err(e) => {
                    warn!(pattern, error = %e, "watch could not be established");
                    return;
                }
            };
            while let Some(entry) = watch.next().await {
                match entry {
                    Ok(entry) => {
                        let deleted =
                            matches!(entry.operation, Operation::Delete | Operation::Purge);
                        let change = PropertyChange {
                            path: key_to_path(&entry.key),
                            kind: if deleted {
                                ChangeKind::Deleted
                            } else {
                                ChangeKind::Updated
                            },
                            record: if deleted {
                                None
                            } else {
                                serializer.deserialize(&entry.value).ok().map(|mut r| {
                                    r.version = i64::try_from(entry.revision).unwrap_or(i64::MAX);
                                    r
                                })
                            },
                        };
                        listener.on_change(change).await;
                    }
                    Err(e) => {
                        warn!(pattern, error = %e, "watch stream error");
                    }
                }
            }
            debug!(pattern, "watch stream ended");
        })
    }
}

#[async_trait]
impl PropertyStore for NatsPropertyStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        if key.is_empty() {
            return Ok(true);
        }
        let main = self.main_kv().await?;
        if main
            .get(&key)
            .await
            .map_err(|e| StoreError::backend("get", e))?
            .is_some()
        {
            return Ok(true);
        }
        let ephemeral = self.ephemeral_kv().await?;
        if ephemeral
            .get(&key)
            .await
            .map_err(|e| StoreError::backend("get", e))?
            .is_some()
        {
            return Ok(true);
        }
        // A namespace exists if anything lives beneath it.
        let prefix = format!("{key}.");
        Ok(self
            .keys_of(&main)
            .await?
            .iter()
            .any(|k| k.starts_with(&prefix)))
    }

    async fn create(&self, path: &str, record: Record) -> Result<(), StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let bytes = self.inner.serializer.serialize(&record)?;
        let kv = self.main_kv().await?;
        match kv.create(&key, bytes).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == CreateErrorKind::AlreadyExists => {
                Err(StoreError::already_exists(path))
            }
            Err(e) => Err(StoreError::backend("create", e)),
        }
    }

    async fn create_ephemeral(&self, path: &str, record: Record) -> Result<(), StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let bytes = self.inner.serializer.serialize(&record)?;
        let kv = self.ephemeral_kv().await?;
        match kv.create(&key, bytes.clone()).await {
            Ok(_) => {}
            Err(e) if e.kind() == CreateErrorKind::AlreadyExists => {
                return Err(StoreError::already_exists(path));
            }
            Err(e) => return Err(StoreError::backend("create", e)),
        }
        self.inner.leases.lock().await.insert(key.clone(), bytes);
        self.ensure_keeper().await;
        debug!(path, "lease established");
        Ok(())
    }

    async fn set(&self, path: &str, record: Record) -> Result<(), StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let kv = self.main_kv().await?;
        if let Some(existing) = kv
            .entry(&key)
            .await
            .map_err(|e| StoreError::backend("entry", e))?
        {
            if !matches!(existing.operation, Operation::Delete | Operation::Purge) {
                let old = self.decode(&existing.value, existing.revision)?;
                if self.inner.comparator.equals(&old, &record) {
                    return Ok(());
                }
            }
        }
        let bytes = self.inner.serializer.serialize(&record)?;
        kv.put(&key, bytes)
            .await
            .map_err(|e| StoreError::backend("put", e))?;
        Ok(())
    }

    async fn update(&self, path: &str, mut updater: Updater) -> Result<Record, StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let kv = self.main_kv().await?;
        let mut last_error = None;
        for _ in 0..UPDATE_CAS_ATTEMPTS {
            let entry = kv
                .entry(&key)
                .await
                .map_err(|e| StoreError::backend("entry", e))?;
            let current = match entry {
                Some(ref e) if !matches!(e.operation, Operation::Delete | Operation::Purge) => {
                    Some(self.decode(&e.value, e.revision)?)
                }
                _ => None,
            };
            let mut record = updater(current.clone());
            if let Some(ref old) = current {
                if self.inner.comparator.equals(old, &record) {
                    return Ok(old.clone());
                }
            }
            let bytes = self.inner.serializer.serialize(&record)?;
            let committed = match current {
                Some(ref old) => {
                    let revision = u64::try_from(old.version).unwrap_or(0);
                    kv.update(&key, bytes, revision).await
                }
                None => match kv.create(&key, bytes).await {
                    Ok(revision) => Ok(revision),
                    Err(e) => {
                        last_error = Some(StoreError::backend("create", e));
                        continue;
                    }
                },
            };
            match committed {
                Ok(revision) => {
                    record.version = i64::try_from(revision).unwrap_or(i64::MAX);
                    return Ok(record);
                }
                Err(e) => {
                    // Lost the race on this path; re-read and try again.
                    last_error = Some(StoreError::backend("update", e));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StoreError::backend("update", "cas retries exhausted")))
    }

    async fn get(&self, path: &str) -> Result<Record, StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let kv = self.main_kv().await?;
        if let Some(entry) = kv
            .entry(&key)
            .await
            .map_err(|e| StoreError::backend("entry", e))?
        {
            if !matches!(entry.operation, Operation::Delete | Operation::Purge) {
                return self.decode(&entry.value, entry.revision);
            }
        }
        let ephemeral = self.ephemeral_kv().await?;
        if let Some(entry) = ephemeral
            .entry(&key)
            .await
            .map_err(|e| StoreError::backend("entry", e))?
        {
            if !matches!(entry.operation, Operation::Delete | Operation::Purge) {
                return self.decode(&entry.value, entry.revision);
            }
        }
        Err(StoreError::not_found(path))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let kv = self.main_kv().await?;
        kv.purge(&key)
            .await
            .map_err(|e| StoreError::backend("purge", e))?;
        let ephemeral = self.ephemeral_kv().await?;
        ephemeral
            .purge(&key)
            .await
            .map_err(|e| StoreError::backend("purge", e))?;
        self.inner.leases.lock().await.remove(&key);
        Ok(())
    }

    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError> {
        self.check_running()?;
        let key = path_to_key(path)?;
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{key}.")
        };
        for kv in [self.main_kv().await?, self.ephemeral_kv().await?] {
            for found in self.keys_of(&kv).await? {
                if found == key || found.starts_with(&prefix) {
                    kv.purge(&found)
                        .await
                        .map_err(|e| StoreError::backend("purge", e))?;
                    self.inner.leases.lock().await.remove(&found);
                }
            }
        }
        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        self.check_running()?;
        let prefix_key = path_to_key(path)?;
        let mut children = Vec::new();
        for kv in [self.main_kv().await?, self.ephemeral_kv().await?] {
            for key in self.keys_of(&kv).await? {
                if let Some(child) = child_of(&key, &prefix_key) {
                    if !children.iter().any(|c| c == child) {
                        children.push(child.to_string());
                    }
                }
            }
        }
        children.sort();
        Ok(children)
    }

    async fn subscribe(
        &self,
        prefix: &str,
        listener: Arc<dyn PropertyChangeListener>,
    ) -> Result<SubscriptionId, StoreError> {
        self.check_running()?;
        let prefix_key = path_to_key(prefix)?;
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        let mut pumps = Vec::new();
        let patterns = if prefix_key.is_empty() {
            vec![">".to_string()]
        } else {
            vec![prefix_key.clone(), format!("{prefix_key}.>")]
        };
        for kv in [self.main_kv().await?, self.ephemeral_kv().await?] {
            for pattern in &patterns {
                pumps.push(self.spawn_watcher(kv.clone(), pattern.clone(), listener.clone()));
            }
        }
        self.inner.subscriptions.lock().await.insert(id, pumps);
        debug!(prefix, subscription = id.0, "subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(pumps) = self.inner.subscriptions.lock().await.remove(&id) {
            for pump in pumps {
                pump.abort();
            }
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    async fn stop(&self) -> Result<(), StoreError> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(keeper) = self.inner.keeper.lock().await.take() {
            keeper.abort();
        }
        let leases: Vec<String> = self.inner.leases.lock().await.drain().map(|(k, _)| k).collect();
        if !leases.is_empty() {
            match self.ephemeral_kv().await {
                Ok(kv) => {
                    for key in leases {
                        if let Err(e) = kv.purge(&key).await {
                            warn!(key, error = %e, "lease removal failed; TTL will expire it");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "lease removal could not reach bucket"),
            }
        }
        let mut subscriptions = self.inner.subscriptions.lock().await;
        for (_, pumps) in subscriptions.drain() {
            for pump in pumps {
                pump.abort();
            }
        }
        debug!(bucket = self.inner.bucket, "stopped nats property store");
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            ephemeral: true,
            leader_election: true,
        }
    }
}

impl std::fmt::Debug for NatsPropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsPropertyStore")
            .field("bucket", &self.inner.bucket)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_mapping_is_bijective() {
        let key = path_to_key("/c/IDEALSTATES/db").unwrap();
        assert_eq!(key, "c.IDEALSTATES.db");
        assert_eq!(key_to_path(&key), "/c/IDEALSTATES/db");
    }

    #[test]
    fn test_dotted_segments_are_rejected() {
        assert!(matches!(
            path_to_key("/c/bad.segment"),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_child_of() {
        assert_eq!(child_of("c.IDEALSTATES.db", "c.IDEALSTATES"), Some("db"));
        assert_eq!(child_of("c.IDEALSTATES.db.part", "c.IDEALSTATES"), Some("db"));
        assert_eq!(child_of("c.IDEALSTATES", "c.IDEALSTATES"), None);
        assert_eq!(child_of("c.CONFIGS.x", "c.IDEALSTATES"), None);
        assert_eq!(child_of("c", ""), Some("c"));
    }
}
