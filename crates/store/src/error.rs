//! Failure modes of the watermark store.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport, auth or I/O failure.  Nothing was read or written; safe to retry.
    #[error("watermark store unavailable: {0}")]
    Unavailable(String),

    /// The document was fetched but does not match the expected schema.
    #[error("watermark document corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
