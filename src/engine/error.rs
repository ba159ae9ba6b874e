//! Error types delivered to request continuations

use std::fmt;
use std::io;

/// Result type alias for protocol exchanges
pub type EngineResult<T> = Result<T, EngineError>;

/// Terminal outcome of a failed protocol exchange
///
/// Raw socket errors never reach plugins; they are folded into one of
/// these variants at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No response after all attempts
    Timeout { retries: u32 },

    /// TCP connect did not finish in time
    ConnectTimeout,

    /// Connection refused, host or network unreachable, other socket failures
    Unreachable(String),

    /// Malformed or unexpected response
    Protocol(String),

    /// The agent answered with a non-zero error-status
    Snmp { status: String },

    /// The agent has no value for the requested OID
    NoSuchObject(String),

    /// The request itself could not be built (bad OID, missing credentials)
    InvalidRequest(String),
}

impl EngineError {
    /// Transport errors may be retried, all others are terminal
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::ConnectTimeout | EngineError::Unreachable(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Timeout { retries } => {
                write!(f, "no response after {} retries", retries)
            }
            EngineError::ConnectTimeout => write!(f, "connection timed out"),
            EngineError::Unreachable(msg) => write!(f, "{}", msg),
            EngineError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            EngineError::Snmp { status } => write!(f, "SNMP error-status {}", status),
            EngineError::NoSuchObject(oid) => write!(f, "no such object: {}", oid),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => EngineError::ConnectTimeout,
            _ => EngineError::Unreachable(err.to_string()),
        }
    }
}
