//! Crate-wide error taxonomy.
//!
//! Four failure classes cover everything the orchestration layer can
//! produce. Nothing is retried here; callers that want retry or timeouts
//! wrap the operation externally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed caller input caught before any I/O was issued.
    #[error("invalid input: {0}")]
    InputRejected(String),

    /// The embedding backend or storage engine failed. The underlying
    /// error is preserved unchanged.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[source] anyhow::Error),

    /// The embedding backend returned a shape that cannot be sliced into
    /// per-input vectors. Carries a description of what was observed.
    #[error("unsupported embedding output shape: {shape}")]
    UnsupportedOutputShape { shape: String },

    /// A write inside a batch upsert failed. The whole batch was rolled
    /// back; no partial writes are visible.
    #[error("batch upsert rolled back: {0}")]
    TransactionFailed(#[source] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::BackendUnavailable(err.into())
    }
}

impl Error {
    /// Wrap an embedding-backend failure, surfacing it unchanged.
    pub fn backend(err: anyhow::Error) -> Self {
        Error::BackendUnavailable(err)
    }
}
