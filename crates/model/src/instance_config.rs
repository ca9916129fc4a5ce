use shoal_record::Record;

const HOSTNAME: &str = "HOSTNAME";
const PORT: &str = "PORT";
const ENABLED: &str = "ENABLED";

/// Configuration record of one instance. The id is `{hostname}_{port}`
/// and doubles as the instance's logical id everywhere else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    record: Record,
}

impl InstanceConfig {
    /// Creates an enabled config from hostname and port.
    #[must_use]
    pub fn new(hostname: &str, port: u16) -> Self {
        let mut record = Record::new(format!("{hostname}_{port}"));
        record.set_simple_field(HOSTNAME, hostname);
        record.set_simple_field(PORT, port.to_string());
        Self { record }
    }

    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.record.id()
    }

    /// The configured hostname.
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.record.simple_field(HOSTNAME)
    }

    /// The configured port.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.record.simple_field(PORT)?.parse().ok()
    }

    /// Whether the instance participates in placement. Defaults to true.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.record
            .simple_field(ENABLED)
            .is_none_or(|v| v == "true")
    }

    /// Toggles the enabled flag.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.record.set_simple_field(ENABLED, enabled.to_string());
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
