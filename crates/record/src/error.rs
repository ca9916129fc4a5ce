use thiserror::Error;

/// Errors that can occur at the record codec boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialize(String),
}
