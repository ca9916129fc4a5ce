//! Typed change listeners dispatched by a manager handle.
//!
//! Each listener kind receives a fresh wholesale snapshot of its scope,
//! not a delta. Delivery is at-least-once: every registration is primed
//! with the current snapshot before `add_*` returns, and a change may be
//! reported more than once around (re)subscription. Callbacks run on a
//! dispatch task, never on the mutating caller; two snapshots for the
//! same registration arrive in commit order.

use async_trait::async_trait;
use shoal_model::{ExternalView, IdealState, InstanceConfig, LiveInstance};
use shoal_record::Record;

/// Identifies one listener registration on a manager handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Observes the declared ideal states of the cluster's resource groups.
#[async_trait]
pub trait IdealStateChangeListener: Send + Sync + 'static {
    /// Receives the current set of ideal states.
    async fn on_ideal_state_change(&self, ideal_states: Vec<IdealState>);
}

/// Observes the set of live instances.
#[async_trait]
pub trait LiveInstanceChangeListener: Send + Sync + 'static {
    /// Receives the current set of live instances.
    async fn on_live_instance_change(&self, live_instances: Vec<LiveInstance>);
}

/// Observes one instance's per-session current-state reports.
#[async_trait]
pub trait CurrentStateChangeListener: Send + Sync + 'static {
    /// Receives the instance's current-state records.
    async fn on_current_state_change(&self, instance: &str, current_states: Vec<Record>);
}

/// Observes instance configuration records. Controller-only.
#[async_trait]
pub trait ConfigChangeListener: Send + Sync + 'static {
    /// Receives the current set of instance configs.
    async fn on_config_change(&self, configs: Vec<InstanceConfig>);
}

/// Observes computed external views. Controller-only.
#[async_trait]
pub trait ExternalViewChangeListener: Send + Sync + 'static {
    /// Receives the current set of external views.
    async fn on_external_view_change(&self, external_views: Vec<ExternalView>);
}

/// Observes the controller namespace. Controller-only.
#[async_trait]
pub trait ControllerChangeListener: Send + Sync + 'static {
    /// Receives the current leader, or `None` while the seat is vacant.
    async fn on_controller_change(&self, leader: Option<LiveInstance>);
}
