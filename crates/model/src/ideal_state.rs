use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use shoal_record::Record;

const NUM_PARTITIONS: &str = "NUM_PARTITIONS";
const STATE_MODEL_DEF_REF: &str = "STATE_MODEL_DEF_REF";
const IDEAL_STATE_MODE: &str = "IDEAL_STATE_MODE";

/// How partition placement is declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdealStateMode {
    /// Per-partition preference lists; the controller assigns states.
    #[default]
    Auto,
    /// Explicit partition -> instance -> state assignments.
    Customized,
}

impl fmt::Display for IdealStateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "AUTO",
            Self::Customized => "CUSTOMIZED",
        })
    }
}

impl FromStr for IdealStateMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(Self::Auto),
            "CUSTOMIZED" => Ok(Self::Customized),
            _ => Err(()),
        }
    }
}

/// The declared target placement of one resource group's partitions.
///
/// Written and read wholesale; never partially patched by this layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdealState {
    record: Record,
}

impl IdealState {
    /// Creates an empty ideal-state shell for a resource group.
    #[must_use]
    pub fn new(resource_group: &str) -> Self {
        Self {
            record: Record::new(resource_group),
        }
    }

    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The resource-group name.
    #[must_use]
    pub fn resource_group(&self) -> &str {
        self.record.id()
    }

    /// The declared partition count.
    #[must_use]
    pub fn num_partitions(&self) -> Option<u32> {
        self.record.simple_field(NUM_PARTITIONS)?.parse().ok()
    }

    /// Declares the partition count.
    pub fn set_num_partitions(&mut self, count: u32) {
        self.record.set_simple_field(NUM_PARTITIONS, count.to_string());
    }

    /// The referenced state-model definition id.
    #[must_use]
    pub fn state_model_def_ref(&self) -> Option<&str> {
        self.record.simple_field(STATE_MODEL_DEF_REF)
    }

    /// References a state-model definition id.
    pub fn set_state_model_def_ref(&mut self, id: &str) {
        self.record.set_simple_field(STATE_MODEL_DEF_REF, id);
    }

    /// The placement mode. Defaults to AUTO when unset.
    #[must_use]
    pub fn mode(&self) -> IdealStateMode {
        self.record
            .simple_field(IDEAL_STATE_MODE)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Sets the placement mode.
    pub fn set_mode(&mut self, mode: IdealStateMode) {
        self.record.set_simple_field(IDEAL_STATE_MODE, mode.to_string());
    }

    /// AUTO mode: the preference list of instance ids for a partition.
    #[must_use]
    pub fn preference_list(&self, partition: &str) -> Option<&[String]> {
        self.record.list_field(partition)
    }

    /// AUTO mode: declares the preference list for a partition.
    pub fn set_preference_list(&mut self, partition: &str, instances: Vec<String>) {
        self.record.set_list_field(partition, instances);
    }

    /// CUSTOMIZED mode: the instance -> state assignments for a partition.
    #[must_use]
    pub fn instance_state_map(&self, partition: &str) -> Option<&BTreeMap<String, String>> {
        self.record.map_field(partition)
    }

    /// CUSTOMIZED mode: declares the assignments for a partition.
    pub fn set_instance_state_map(
        &mut self,
        partition: &str,
        assignments: BTreeMap<String, String>,
    ) {
        self.record.set_map_field(partition, assignments);
    }

    /// Borrows the underlying record.
    #[must_use]
    pub const fn record(&self) -> &Record {
        &self.record
    }

    /// Unwraps into the underlying record.
    #[must_use]
    pub fn into_record(self) -> Record {
        self.record
    }
}

/// The observed per-partition, per-instance state of one resource group,
/// aggregated from participants' current-state reports. Read-only here;
/// a controller collaborator computes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalView {
    record: Record,
}

impl ExternalView {
    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The resource-group name.
    #[must_use]
    pub fn resource_group(&self) -> &str {
        self.record.id()
    }

    /// The partitions with observed state.
    #[must_use]
    pub fn partitions(&self) -> Vec<&str> {
        self.record.map_fields.keys().map(String::as_str).collect()
    }

    /// The observed instance -> state map for a partition.
    #[must_use]
    pub fn state_map(&self, partition: &str) -> Option<&BTreeMap<String, String>> {
        self.record.map_field(partition)
    }

    /// Borrows the underlying record.
    #[must_use]
    pub const fn record(&self) -> &Record {
        &self.record
    }
}
