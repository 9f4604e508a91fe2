//! Engine Error Types
//!
//! Every failure the engine can surface is one variant of [`EngineError`].
//! Plan-time errors (parse, unresolved name, type mismatch, unsupported
//! operation, invalid temporal clause) are raised before a cursor is
//! returned; execution errors (I/O, runtime conversion, out-of-resources,
//! cancellation) are raised during the pull loop. The cursor delivers at
//! most one error and then treats the stream as closed.

use std::io;
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// SQL could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// A table, column, alias or parameter did not resolve
    #[error("unresolved name: {0}")]
    UnresolvedName(String),

    /// Incompatible types (join keys, set operations, expressions)
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Legal SQL the engine does not implement
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON decode error (JSON Lines connector)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Memory budget or hash-build capacity exceeded
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// The query was cancelled or timed out
    #[error("query cancelled")]
    Cancelled,

    /// A caller-supplied value violated an input contract
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operator was driven through an illegal state transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invariant violation inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Closed error taxonomy reported to host applications.
///
/// Maps each [`EngineError`] variant onto the stable, user-visible kind
/// so hosts can switch on failures without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    UnresolvedName,
    TypeMismatch,
    UnsupportedOperation,
    IoError,
    OutOfResources,
    Cancelled,
    InvalidInput,
    InvalidState,
    InternalError,
}

impl EngineError {
    /// The user-visible kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Parse(_) => ErrorKind::ParseError,
            EngineError::UnresolvedName(_) => ErrorKind::UnresolvedName,
            EngineError::TypeMismatch(_) => ErrorKind::TypeMismatch,
            EngineError::Unsupported(_) => ErrorKind::UnsupportedOperation,
            EngineError::Io(_) | EngineError::Parquet(_) | EngineError::Json(_) => {
                ErrorKind::IoError
            }
            EngineError::Arrow(_) => ErrorKind::InternalError,
            EngineError::OutOfResources(_) => ErrorKind::OutOfResources,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Whether this error was raised at plan time (before a cursor exists).
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ParseError
                | ErrorKind::UnresolvedName
                | ErrorKind::TypeMismatch
                | ErrorKind::UnsupportedOperation
        )
    }
}

impl From<sqlparser::parser::ParserError> for EngineError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        EngineError::Parse(err.to_string())
    }
}
