//! The cluster namespace scheme and the typed record wrappers stored in it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod ideal_state;
mod instance_config;
mod live_instance;
mod message;
mod property_type;
mod state_model;

pub use ideal_state::{ExternalView, IdealState, IdealStateMode};
pub use instance_config::InstanceConfig;
pub use live_instance::LiveInstance;
pub use message::Message;
pub use property_type::{PropertyType, parse_path};
pub use state_model::StateModelDefinition;

/// Name of the ephemeral leader node under the CONTROLLER namespace.
pub const LEADER_NODE: &str = "LEADER";

/// Returns true when `segment` can be used as one path segment: non-empty
/// and free of the separators reserved by the two backends.
#[must_use]
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/') && !segment.contains('.')
}
