use shoal_record::Record;

const FROM_INSTANCE: &str = "FROM_INSTANCE";
const TO_INSTANCE: &str = "TO_INSTANCE";
const MSG_TYPE: &str = "MSG_TYPE";

/// An addressed record dropped off under the MESSAGES namespace. Framing,
/// delivery, and retry belong to the messaging collaborator; this layer
/// only stores the envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    record: Record,
}

impl Message {
    /// Creates a message envelope.
    #[must_use]
    pub fn new(id: &str, from: &str, to: &str, msg_type: &str) -> Self {
        let mut record = Record::new(id);
        record.set_simple_field(FROM_INSTANCE, from);
        record.set_simple_field(TO_INSTANCE, to);
        record.set_simple_field(MSG_TYPE, msg_type);
        Self { record }
    }

    /// Wraps an existing record.
    #[must_use]
    pub const fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// The message id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.record.id()
    }

    /// The sending instance.
    #[must_use]
    pub fn from_instance(&self) -> Option<&str> {
        self.record.simple_field(FROM_INSTANCE)
    }

    /// The addressed instance.
    #[must_use]
    pub fn to_instance(&self) -> Option<&str> {
        self.record.simple_field(TO_INSTANCE)
    }

    /// The collaborator-defined message type.
    #[must_use]
    pub fn msg_type(&self) -> Option<&str> {
        self.record.simple_field(MSG_TYPE)
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
