//! Error taxonomy for the retrieval engine.
//!
//! Components recover locally what they can (cache misses, dead pool
//! handles, keyword-model unavailability); everything else bubbles up as
//! an [`EngineError`] so the orchestrating task can decide retry-vs-terminal
//! based on `kind()` rather than string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Input out of range (e.g. `access_level` missing or outside `[1,100]`).
    /// Surfaced immediately; never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Pool-borrow timeout or external-service timeout. Retried at the
    /// task level with exponential backoff.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Connection reset, 5xx from an external service. Retried; surfaced
    /// as a retrieval failure on persistent failure.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Cache entry unmarshal failure, invalid tokenized corpus. Recovered
    /// locally by invalidate-and-rebuild; this variant should not escape
    /// a component boundary, but is kept for completeness/logging.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The keyword extractor's semantic backend is unavailable or timed
    /// out. Degrades to an empty semantic-keywords list; never fatal.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Unsupported file extension, zero bytes from parser, persistence
    /// failure after retries. Document status transitions to `ERROR`.
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ResourceExhausted,
    Transient,
    Corruption,
    ModelUnavailable,
    Fatal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            EngineError::Transient(_) => ErrorKind::Transient,
            EngineError::Corruption(_) => ErrorKind::Corruption,
            EngineError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            EngineError::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the task-level retry loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ResourceExhausted | ErrorKind::Transient)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
