#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Invalid or missing store location. Fatal at startup.
    #[error("store configuration: {0}")]
    Configuration(String),

    /// Unit-of-work misuse: no active session, or a nested start.
    /// A programmer error; never retried.
    #[error("concurrency context: {0}")]
    ConcurrencyContext(String),

    /// Underlying store read/write failure, or a snapshot that exists
    /// but cannot be decoded. Distinct from absence.
    #[error("store I/O: {0}")]
    Io(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
