//! The closed set of errors the engine can return.
//!
//! Unlike the ambient `anyhow::Result` an application binary reaches for,
//! a library that promises callers can tell "the name wasn't interned"
//! apart from "the disk is failing" needs a real enumeration callers can
//! match on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GsdError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    #[error("file must be writable: {0}")]
    FileMustBeWritable(String),
}

pub type Result<T> = std::result::Result<T, GsdError>;

impl From<std::io::Error> for GsdError {
    fn from(e: std::io::Error) -> Self {
        GsdError::Io(e.to_string())
    }
}

/// `gsd_io` backends return `anyhow::Result`; the engine folds any failure
/// from that layer into `GsdError::Io` since by the time it crosses that
/// boundary it is always a low-level I/O failure (read/write/seek/mmap).
impl From<anyhow::Error> for GsdError {
    fn from(e: anyhow::Error) -> Self {
        GsdError::Io(format!("{:#}", e))
    }
}
