//! The pure mapping between logical cluster properties and store paths.
//!
//! The mapping is injective and stable across process restarts: two
//! distinct logical properties never collide on one path, and a fixed type
//! tuple always maps to the same path. The inverse mapping exists so
//! change-notification dispatch can tell which listener category fired.

use std::fmt;

/// The fixed child namespaces of a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyType {
    /// Per-instance skeleton nodes.
    Instances,
    /// Instance configuration records.
    Configs,
    /// Declared target placement per resource group.
    IdealStates,
    /// Observed placement per resource group, computed externally.
    ExternalView,
    /// Legal states and transitions per model id.
    StateModelDefs,
    /// Ephemeral liveness records.
    LiveInstances,
    /// Controller namespace, including the ephemeral leader node.
    Controller,
    /// Inter-instance message drop-off.
    Messages,
    /// Per-instance, per-session current-state reports.
    CurrentStates,
    /// Free-form user property space.
    PropertyStore,
}

impl PropertyType {
    /// Every fixed namespace, in the order they are created under a new
    /// cluster. A cluster is "set up" iff all of these exist.
    pub const ALL: [Self; 10] = [
        Self::Instances,
        Self::Configs,
        Self::IdealStates,
        Self::ExternalView,
        Self::StateModelDefs,
        Self::LiveInstances,
        Self::Controller,
        Self::Messages,
        Self::CurrentStates,
        Self::PropertyStore,
    ];

    /// The namespace node name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instances => "INSTANCES",
            Self::Configs => "CONFIGS",
            Self::IdealStates => "IDEALSTATES",
            Self::ExternalView => "EXTERNALVIEW",
            Self::StateModelDefs => "STATEMODELDEFS",
            Self::LiveInstances => "LIVEINSTANCES",
            Self::Controller => "CONTROLLER",
            Self::Messages => "MESSAGES",
            Self::CurrentStates => "CURRENTSTATES",
            Self::PropertyStore => "PROPERTYSTORE",
        }
    }

    fn from_namespace(namespace: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == namespace)
    }

    /// Builds the store path for this property type.
    ///
    /// With no keys this is the namespace root, e.g.
    /// `path("C", &[])` for [`Self::IdealStates`] is `/C/IDEALSTATES`;
    /// `path("C", &["db"])` is `/C/IDEALSTATES/db`.
    #[must_use]
    pub fn path(self, cluster: &str, keys: &[&str]) -> String {
        let mut path = format!("/{cluster}/{}", self.as_str());
        for key in keys {
            path.push('/');
            path.push_str(key);
        }
        path
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inverse of [`PropertyType::path`]: recovers the cluster name, property
/// type, and remaining keys from a store path. Returns `None` for paths
/// outside the scheme (the cluster root, or a foreign namespace).
#[must_use]
pub fn parse_path(path: &str) -> Option<(String, PropertyType, Vec<String>)> {
    let mut segments = path.strip_prefix('/')?.split('/');
    let cluster = segments.next().filter(|s| !s.is_empty())?;
    let property_type = PropertyType::from_namespace(segments.next()?)?;
    let keys: Vec<String> = segments.map(String::from).collect();
    Some((cluster.to_string(), property_type, keys))
}
