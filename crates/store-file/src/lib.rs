//! Property store backed by durable flat files, for local single-process
//! testing and standalone use.
//!
//! A node at `/a/b` keeps its record in `<root>/a/b.rec` and its children
//! under the directory `<root>/a/b/`, so a node can carry both data and
//! children like a coordination-service node. Change notification is
//! in-process: every handle cloned from one opened store shares a
//! dispatcher, and committed mutations are fanned out to subscription pump
//! tasks. There is no cross-process notification, no ephemeral guarantee,
//! and no leader election; `capabilities()` says so.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use shoal_record::{Record, SharedComparator, SharedSerializer};
use shoal_store::path as store_path;
use shoal_store::{
    ChangeKind, PropertyChange, PropertyChangeListener, PropertyStore, StoreCapabilities,
    StoreError, SubscriptionId, Updater,
};
use tokio::fs;
use tokio::io::{self, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Extension of the per-node record files.
const RECORD_EXT: &str = "rec";

struct Subscription {
    prefix: String,
    tx: mpsc::UnboundedSender<PropertyChange>,
    pump: JoinHandle<()>,
}

struct Inner {
    root: PathBuf,
    serializer: SharedSerializer,
    comparator: SharedComparator,
    path_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // Writers hold this shared, remove_recursive holds it exclusively, so
    // the collected deletion listing is the exact set of committed records.
    tree_lock: RwLock<()>,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    next_subscription: AtomicU64,
    stopped: AtomicBool,
}

/// Durable flat-file property store.
#[derive(Clone)]
pub struct FilePropertyStore {
    inner: Arc<Inner>,
}

impl FilePropertyStore {
    /// Opens a store rooted at the given directory, creating it if needed.
    ///
    /// The serializer and comparator are injected strategies; the
    /// comparator is consulted for optimistic no-op detection on writes.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the root directory cannot be created.
    pub async fn open(
        root: impl Into<PathBuf>,
        serializer: SharedSerializer,
        comparator: SharedComparator,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| StoreError::Io {
            context: "creating store root",
            source: e,
        })?;
        debug!(root = %root.display(), "opened file property store");
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                serializer,
                comparator,
                path_locks: Mutex::new(HashMap::new()),
                tree_lock: RwLock::new(()),
                subscriptions: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// The root directory this store writes under.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.inner.root
    }

    fn record_file(&self, segments: &[&str]) -> PathBuf {
        let mut file = self.inner.root.clone();
        for segment in &segments[..segments.len() - 1] {
            file.push(segment);
        }
        file.push(format!("{}.{RECORD_EXT}", segments[segments.len() - 1]));
        file
    }

    fn node_dir(&self, segments: &[&str]) -> PathBuf {
        let mut dir = self.inner.root.clone();
        for segment in segments {
            dir.push(segment);
        }
        dir
    }

    async fn lock_path(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.path_locks.lock().await;
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_record(&self, segments: &[&str]) -> Result<Option<Record>, StoreError> {
        if segments.is_empty() {
            return Ok(None);
        }
        match fs::read(self.record_file(segments)).await {
            Ok(data) => Ok(Some(self.inner.serializer.deserialize(&data)?)),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                context: "reading record file",
                source: e,
            }),
        }
    }

    async fn write_record(&self, segments: &[&str], record: &Record) -> Result<(), StoreError> {
        let file = self.record_file(segments);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StoreError::Io {
                context: "creating namespace directories",
                source: e,
            })?;
        }
        let bytes = self.inner.serializer.serialize(record)?;
        let mut handle = fs::File::create(&file).await.map_err(|e| StoreError::Io {
            context: "creating record file",
            source: e,
        })?;
        handle.write_all(&bytes).await.map_err(|e| StoreError::Io {
            context: "writing record file",
            source: e,
        })?;
        Ok(())
    }

    async fn notify(&self, changes: Vec<PropertyChange>) {
        let subscriptions = self.inner.subscriptions.lock().await;
        for change in changes {
            for sub in subscriptions.values() {
                if store_path::is_under(&change.path, &sub.prefix) {
                    // Send failures mean the pump is gone; nothing to do.
                    let _ = sub.tx.send(change.clone());
                }
            }
        }
    }

    /// Collects the paths of all records at or beneath `path`, depth first.
    async fn collect_record_paths(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let mut found = Vec::new();
        let segments = store_path::split(path)?;
        if self.read_record(&segments).await?.is_some() {
            found.push(path.to_string());
        }
        let mut pending = vec![(path.to_string(), self.node_dir(&segments))];
        while let Some((node_path, dir)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::Io {
                        context: "walking store directory",
                        source: e,
                    });
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::Io {
                context: "walking store directory",
                source: e,
            })? {
                let Some(name) = entry.file_name().to_str().map(String::from) else {
                    continue;
                };
                let child_base = if node_path == "/" {
                    String::new()
                } else {
                    node_path.clone()
                };
                if let Some(stem) = name.strip_suffix(&format!(".{RECORD_EXT}")) {
                    found.push(format!("{child_base}/{stem}"));
                } else if entry.path().is_dir() {
                    pending.push((format!("{child_base}/{name}"), entry.path()));
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl PropertyStore for FilePropertyStore {
    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let segments = store_path::split(path)?;
        if segments.is_empty() {
            return Ok(true);
        }
        if fs::try_exists(self.record_file(&segments))
            .await
            .map_err(|e| StoreError::Io {
                context: "checking record file",
                source: e,
            })?
        {
            return Ok(true);
        }
        fs::try_exists(self.node_dir(&segments))
            .await
            .map_err(|e| StoreError::Io {
                context: "checking namespace directory",
                source: e,
            })
    }

    async fn create(&self, path: &str, mut record: Record) -> Result<(), StoreError> {
        let segments = store_path::split(path)?;
        if segments.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot create the root".to_string(),
            ));
        }
        let _tree = self.inner.tree_lock.read().await;
        let lock = self.lock_path(path).await;
        let _guard = lock.lock().await;
        if self.read_record(&segments).await?.is_some() {
            return Err(StoreError::already_exists(path));
        }
        record.version = 0;
        self.write_record(&segments, &record).await?;
        self.notify(vec![PropertyChange {
            path: path.to_string(),
            kind: ChangeKind::Created,
            record: Some(record),
        }])
        .await;
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, record: Record) -> Result<(), StoreError> {
        // Durable on this backend: no auto-removal when the session ends.
        debug!(path, "storing session-bound record without liveness guarantee");
        self.create(path, record).await
    }

    async fn set(&self, path: &str, mut record: Record) -> Result<(), StoreError> {
        let segments = store_path::split(path)?;
        if segments.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot set the root".to_string(),
            ));
        }
        let _tree = self.inner.tree_lock.read().await;
        let lock = self.lock_path(path).await;
        let _guard = lock.lock().await;
        let previous = self.read_record(&segments).await?;
        if let Some(ref old) = previous {
            if self.inner.comparator.equals(old, &record) {
                return Ok(());
            }
        }
        let kind = if previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        record.version = previous.map_or(0, |old| old.version + 1);
        self.write_record(&segments, &record).await?;
        self.notify(vec![PropertyChange {
            path: path.to_string(),
            kind,
            record: Some(record),
        }])
        .await;
        Ok(())
    }

    async fn update(&self, path: &str, mut updater: Updater) -> Result<Record, StoreError> {
        let segments = store_path::split(path)?;
        if segments.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot update the root".to_string(),
            ));
        }
        let _tree = self.inner.tree_lock.read().await;
        let lock = self.lock_path(path).await;
        let _guard = lock.lock().await;
        let previous = self.read_record(&segments).await?;
        let mut record = updater(previous.clone());
        if let Some(ref old) = previous {
            if self.inner.comparator.equals(old, &record) {
                return Ok(old.clone());
            }
        }
        let kind = if previous.is_some() {
            ChangeKind::Updated
        } else {
            ChangeKind::Created
        };
        record.version = previous.map_or(0, |old| old.version + 1);
        self.write_record(&segments, &record).await?;
        self.notify(vec![PropertyChange {
            path: path.to_string(),
            kind,
            record: Some(record.clone()),
        }])
        .await;
        Ok(record)
    }

    async fn get(&self, path: &str) -> Result<Record, StoreError> {
        let segments = store_path::split(path)?;
        self.read_record(&segments)
            .await?
            .ok_or_else(|| StoreError::not_found(path))
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let segments = store_path::split(path)?;
        if segments.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot remove the root".to_string(),
            ));
        }
        let _tree = self.inner.tree_lock.read().await;
        let lock = self.lock_path(path).await;
        let _guard = lock.lock().await;
        let mut removed = false;
        match fs::remove_file(self.record_file(&segments)).await {
            Ok(()) => removed = true,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io {
                    context: "removing record file",
                    source: e,
                });
            }
        }
        // An empty namespace directory goes with the record.
        let _ = fs::remove_dir(self.node_dir(&segments)).await;
        if removed {
            self.notify(vec![PropertyChange {
                path: path.to_string(),
                kind: ChangeKind::Deleted,
                record: None,
            }])
            .await;
        }
        Ok(())
    }

    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError> {
        let segments = store_path::split(path)?;
        let _tree = self.inner.tree_lock.write().await;
        let removed = self.collect_record_paths(path).await?;
        if !segments.is_empty() {
            let _ = fs::remove_dir_all(self.node_dir(&segments)).await;
            match fs::remove_file(self.record_file(&segments)).await {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Io {
                        context: "removing record file",
                        source: e,
                    });
                }
            }
        }
        self.notify(
            removed
                .into_iter()
                .rev()
                .map(|p| PropertyChange {
                    path: p,
                    kind: ChangeKind::Deleted,
                    record: None,
                })
                .collect(),
        )
        .await;
        Ok(())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError> {
        let segments = store_path::split(path)?;
        let dir = self.node_dir(&segments);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    context: "listing children",
                    source: e,
                });
            }
        };
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::Io {
            context: "listing children",
            source: e,
        })? {
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let child = name
                .strip_suffix(&format!(".{RECORD_EXT}"))
                .map_or(name.clone(), String::from);
            if !children.contains(&child) {
                children.push(child);
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
        store_path::split(prefix)?;
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = mpsc::unbounded_channel::<PropertyChange>();
        let pump = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                listener.on_change(change).await;
            }
        });
        self.inner.subscriptions.lock().await.insert(
            id,
            Subscription {
                prefix: prefix.to_string(),
                tx,
                pump,
            },
        );
        debug!(prefix, subscription = id.0, "subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.inner.subscriptions.lock().await.remove(&id) {
            sub.pump.abort();
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    async fn stop(&self) -> Result<(), StoreError> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut subscriptions = self.inner.subscriptions.lock().await;
        for (_, sub) in subscriptions.drain() {
            sub.pump.abort();
        }
        debug!(root = %self.inner.root.display(), "stopped file property store");
        Ok(())
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            ephemeral: false,
            leader_election: false,
        }
    }
}

impl std::fmt::Debug for FilePropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePropertyStore")
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}
