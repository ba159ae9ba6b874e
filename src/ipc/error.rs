use std::fmt;
use std::io;

pub type IpcResult<T> = Result<T, IpcError>;

/// Errors of the messaging fabric
#[derive(Debug)]
pub enum IpcError {
    /// Socket level failure
    Io(io::Error),

    /// Packet that does not follow the tag/frame layout
    Malformed(String),

    /// Unknown tag byte
    UnknownTag(u8),

    /// Known tag with the wrong number of frames
    FrameCount { tag: u8, expected: usize, got: usize },

    /// Frame payload that failed to (de)serialize
    Payload(serde_json::Error),

    /// Message that is valid but not expected at this point
    Unexpected { expected: &'static str, got: String },

    /// Peer closed the connection
    Closed,

    /// No answer within the allotted time
    Timeout,
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::Io(e) => write!(f, "IPC socket error: {}", e),
            IpcError::Malformed(msg) => write!(f, "malformed IPC packet: {}", msg),
            IpcError::UnknownTag(tag) => write!(f, "unknown IPC tag 0x{:02x}", tag),
            IpcError::FrameCount { tag, expected, got } => write!(
                f,
                "tag 0x{:02x} expects {} frame(s), got {}",
                tag, expected, got
            ),
            IpcError::Payload(e) => write!(f, "invalid IPC payload: {}", e),
            IpcError::Unexpected { expected, got } => {
                write!(f, "expected {} message, got {}", expected, got)
            }
            IpcError::Closed => write!(f, "connection closed by peer"),
            IpcError::Timeout => write!(f, "timed out waiting for peer"),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IpcError::Io(e) => Some(e),
            IpcError::Payload(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for IpcError {
    fn from(err: io::Error) -> Self {
        IpcError::Io(err)
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::Payload(err)
    }
}
