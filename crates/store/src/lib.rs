//! Abstract interface for the hierarchical, path-addressed, versioned
//! property store underlying all cluster metadata.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod path;

pub use error::StoreError;

use std::sync::Arc;

use async_trait::async_trait;
use shoal_record::Record;

/// Read-modify-write closure for [`PropertyStore::update`].
///
/// Receives the current record at the path, or `None` if the path is
/// vacant, and returns the record to commit. Implementations may re-run
/// the closure when the commit loses a race on the same path.
pub type Updater = Box<dyn FnMut(Option<Record>) -> Record + Send>;

/// Identifies one active subscription of a store handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// What happened to a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path came into existence.
    Created,

    /// The record at the path was overwritten.
    Updated,

    /// The path was removed.
    Deleted,
}

/// A committed change to one path.
#[derive(Clone, Debug)]
pub struct PropertyChange {
    /// The affected path.
    pub path: String,

    /// What happened.
    pub kind: ChangeKind,

    /// The record now at the path; `None` for deletions.
    pub record: Option<Record>,
}

/// Receives change notifications for a subscribed path prefix.
///
/// Callbacks run on a backend notification task, never on the stack frame
/// of the mutating caller. Notifications for one path arrive in commit
/// order; at-least-once delivery is guaranteed while subscribed.
#[async_trait]
pub trait PropertyChangeListener: Send + Sync + 'static {
    /// Handles one committed change.
    async fn on_change(&self, change: PropertyChange);
}

/// What a backend can actually do. Upper layers consult these flags
/// instead of probing for behavioral drift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Session-bound records are auto-removed when the session ends.
    pub ephemeral: bool,

    /// Single-writer leader acquisition is meaningful on this backend.
    pub leader_election: bool,
}

/// A hierarchical, path-namespaced CRUD+watch store of [`Record`]s.
///
/// Paths are `/`-separated absolute strings (`/cluster/IDEALSTATES/db`).
/// Both backends satisfy this contract identically at the interface level;
/// capability differences are reported through [`Self::capabilities`] and
/// surface as [`StoreError::Unsupported`], never as silent degradation.
#[async_trait]
pub trait PropertyStore: Clone + Send + Sync + 'static {
    /// Returns true if a record or namespace node exists at the path.
    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Creates the record at a vacant path.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the path is occupied.
    async fn create(&self, path: &str, record: Record) -> Result<(), StoreError>;

    /// Publishes a session-bound record.
    ///
    /// On the live backend the record is removed automatically when this
    /// handle's session ends, including by process crash. The flat-file
    /// backend stores it durably and gives **no** liveness guarantee;
    /// callers must not rely on auto-removal there (see
    /// [`StoreCapabilities::ephemeral`]).
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if the path is occupied, which doubles
    /// as losing a single-writer acquisition race.
    async fn create_ephemeral(&self, path: &str, record: Record) -> Result<(), StoreError>;

    /// Upserts the record at a path, creating intermediate namespace
    /// segments as needed.
    async fn set(&self, path: &str, record: Record) -> Result<(), StoreError>;

    /// Atomic per-path read-modify-write.
    ///
    /// Single-writer-wins at path granularity; no cross-path transaction.
    async fn update(&self, path: &str, updater: Updater) -> Result<Record, StoreError>;

    /// Reads the record at a path.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the path is vacant.
    async fn get(&self, path: &str) -> Result<Record, StoreError>;

    /// Removes the node at a path.
    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// Removes the node at a path and everything beneath it.
    async fn remove_recursive(&self, path: &str) -> Result<(), StoreError>;

    /// Returns the sorted names of the path's direct children.
    async fn get_children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    /// Registers for change notification under a path prefix.
    async fn subscribe(
        &self,
        prefix: &str,
        listener: Arc<dyn PropertyChangeListener>,
    ) -> Result<SubscriptionId, StoreError>;

    /// Drops a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);

    /// Releases backend resources: ends the session, removes this handle's
    /// ephemeral records, and stops notification delivery. Idempotent.
    async fn stop(&self) -> Result<(), StoreError>;

    /// Reports what this backend can do.
    fn capabilities(&self) -> StoreCapabilities;
}
