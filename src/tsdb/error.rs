//! Error types of the metric writers

use std::fmt;

pub type TsdbResult<T> = Result<T, TsdbError>;

#[derive(Debug)]
pub enum TsdbError {
    /// Backend could not be opened
    OpenFailed(String),

    /// Result could not be serialized
    SerializationError(String),

    /// I/O error (file access, etc.)
    IoError(std::io::Error),

    /// Writer was already closed
    Closed,
}

impl fmt::Display for TsdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsdbError::OpenFailed(msg) => write!(f, "failed to open metric writer: {}", msg),
            TsdbError::SerializationError(msg) => {
                write!(f, "metric serialization error: {}", msg)
            }
            TsdbError::IoError(err) => write!(f, "I/O error: {}", err),
            TsdbError::Closed => write!(f, "metric writer is closed"),
        }
    }
}

impl std::error::Error for TsdbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TsdbError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TsdbError {
    fn from(err: std::io::Error) -> Self {
        TsdbError::IoError(err)
    }
}

impl From<serde_json::Error> for TsdbError {
    fn from(err: serde_json::Error) -> Self {
        TsdbError::SerializationError(err.to_string())
    }
}
