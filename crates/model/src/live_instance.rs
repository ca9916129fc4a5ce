use shoal_record::Record;

const SESSION_ID: &str = "SESSION_ID";
const START_TIME: &str = "START_TIME";

/// Liveness record of one connected instance. On the live backend it is
/// session-bound and disappears when the owning session ends; that
/// disappearance is the failure-detection mechanism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveInstance {
    record: Record,
}

impl LiveInstance {
    /// Creates a liveness record for an instance.
    #[must_use]
    pub fn new(instance: &str, session_id: &str, start_time_millis: i64) -> Self {
        let mut record = Record::new(instance);
        record.set_simple_field(SESSION_ID, session_id);
        record.set_simple_field(START_TIME, start_time_millis.to_string());
        Self { record }
    }

    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The instance id.
    #[must_use]
    pub fn instance(&self) -> &str {
        self.record.id()
    }

    /// The owning session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.record.simple_field(SESSION_ID)
    }

    /// Process start time in epoch milliseconds.
    #[must_use]
    pub fn start_time_millis(&self) -> Option<i64> {
        self.record.simple_field(START_TIME)?.parse().ok()
    }

    /// Unwraps into the underlying record.
    #[must_use]
    pub fn into_record(self) -> Record {
        self.record
    }
}
