use shoal_record::Record;

const STATES: &str = "STATES";
const TRANSITIONS: &str = "TRANSITIONS";

/// The ordered legal states, and legal transitions between them, that
/// partitions of a resource group may occupy. Immutable once stored: the
/// store rejects a duplicate id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateModelDefinition {
    record: Record,
}

impl StateModelDefinition {
    /// Creates an empty definition with the given model id.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            record: Record::new(id),
        }
    }

    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The model id, unique within a cluster.
    #[must_use]
    pub fn id(&self) -> &str {
        self.record.id()
    }

    /// Appends a legal state. Order is preserved.
    pub fn add_state(&mut self, state: &str) {
        let mut states = self
            .record
            .list_field(STATES)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        if !states.iter().any(|s| s == state) {
            states.push(state.to_string());
            self.record.set_list_field(STATES, states);
        }
    }

    /// Declares a legal transition.
    pub fn add_transition(&mut self, from: &str, to: &str) {
        let mut transitions = self
            .record
            .map_field(TRANSITIONS)
            .cloned()
            .unwrap_or_default();
        let targets = transitions.entry(from.to_string()).or_default();
        if targets.split(',').all(|t| t != to) {
            if !targets.is_empty() {
                targets.push(',');
            }
            targets.push_str(to);
        }
        self.record.set_map_field(TRANSITIONS, transitions);
    }

    /// The ordered legal states.
    #[must_use]
    pub fn states(&self) -> Vec<&str> {
        self.record
            .list_field(STATES)
            .map(|states| states.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true when `from -> to` is a declared transition.
    #[must_use]
    pub fn is_transition_legal(&self, from: &str, to: &str) -> bool {
        self.record
            .map_field(TRANSITIONS)
            .and_then(|t| t.get(from))
            .is_some_and(|targets| targets.split(',').any(|t| t == to))
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
