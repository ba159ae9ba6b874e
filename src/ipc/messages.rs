//! Tagged messages exchanged between the poller processes
//!
//! ```text
//! +-----+-------+-----------------+-------------+-----------------+-----
//! | tag | count | frame 0 len u32 | frame 0 ... | frame 1 len u32 | ...
//! +-----+-------+-----------------+-------------+-----------------+-----
//! ```
//!
//! Frame payloads are JSON documents.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WorkerConfig;
use crate::poller::MetricResult;

use super::error::{IpcError, IpcResult};

/// Discriminant byte of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    End = 0x01,
    Init = 0x02,
    Conf = 0x03,
    Ready = 0x04,
    InfoReq = 0x05,
    InfoRep = 0x06,
    Log = 0x10,
    MetricUpdate = 0x11,
}

impl Tag {
    /// Number of frames following the tag
    pub fn frames(&self) -> usize {
        match self {
            Tag::End | Tag::Init | Tag::Ready | Tag::InfoReq => 0,
            Tag::Conf | Tag::InfoRep | Tag::Log | Tag::MetricUpdate => 1,
        }
    }
}

impl TryFrom<u8> for Tag {
    type Error = IpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Tag::End,
            0x02 => Tag::Init,
            0x03 => Tag::Conf,
            0x04 => Tag::Ready,
            0x05 => Tag::InfoReq,
            0x06 => Tag::InfoRep,
            0x10 => Tag::Log,
            0x11 => Tag::MetricUpdate,
            other => return Err(IpcError::UnknownTag(other)),
        })
    }
}

/// Raw tag plus frames, before payload decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: u8,
    pub frames: Vec<Bytes>,
}

impl Envelope {
    pub fn new(tag: Tag, frames: Vec<Bytes>) -> Self {
        Self {
            tag: tag as u8,
            frames,
        }
    }

    pub fn encode(&self) -> IpcResult<Bytes> {
        let count = u8::try_from(self.frames.len())
            .map_err(|_| IpcError::Malformed(format!("{} frames", self.frames.len())))?;

        let size = 2 + self.frames.iter().map(|f| 4 + f.len()).sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(self.tag);
        buf.put_u8(count);
        for frame in &self.frames {
            let len = u32::try_from(frame.len())
                .map_err(|_| IpcError::Malformed("frame too large".to_string()))?;
            buf.put_u32(len);
            buf.put_slice(frame);
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut packet: Bytes) -> IpcResult<Self> {
        if packet.remaining() < 2 {
            return Err(IpcError::Malformed("packet shorter than header".to_string()));
        }
        let tag = packet.get_u8();
        let count = packet.get_u8() as usize;

        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            if packet.remaining() < 4 {
                return Err(IpcError::Malformed(format!("frame {i} length missing")));
            }
            let len = packet.get_u32() as usize;
            if packet.remaining() < len {
                return Err(IpcError::Malformed(format!("frame {i} truncated")));
            }
            frames.push(packet.split_to(len));
        }

        if packet.has_remaining() {
            return Err(IpcError::Malformed(format!(
                "{} trailing bytes",
                packet.remaining()
            )));
        }

        Ok(Self { tag, frames })
    }
}

/// Log event shipped from a worker to the log sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// `TRACE`, `DEBUG`, `INFO`, `WARN` or `ERROR`
    pub level: String,
    pub target: String,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Stop, sent by the supervisor to everyone
    End,
    /// Worker asks for its configuration
    Init,
    Conf(WorkerConfig),
    /// Configuration applied
    Ready,
    InfoReq,
    InfoRep(serde_json::Value),
    Log(LogRecord),
    MetricUpdate(MetricResult),
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::End => Tag::End,
            Message::Init => Tag::Init,
            Message::Conf(_) => Tag::Conf,
            Message::Ready => Tag::Ready,
            Message::InfoReq => Tag::InfoReq,
            Message::InfoRep(_) => Tag::InfoRep,
            Message::Log(_) => Tag::Log,
            Message::MetricUpdate(_) => Tag::MetricUpdate,
        }
    }

    pub fn to_envelope(&self) -> IpcResult<Envelope> {
        let payload = match self {
            Message::End | Message::Init | Message::Ready | Message::InfoReq => None,
            Message::Conf(config) => Some(serde_json::to_vec(config)?),
            Message::InfoRep(info) => Some(serde_json::to_vec(info)?),
            Message::Log(record) => Some(serde_json::to_vec(record)?),
            Message::MetricUpdate(result) => Some(serde_json::to_vec(result)?),
        };

        Ok(Envelope::new(
            self.tag(),
            payload.map(Bytes::from).into_iter().collect(),
        ))
    }
}

impl TryFrom<Envelope> for Message {
    type Error = IpcError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let tag = Tag::try_from(envelope.tag)?;
        if envelope.frames.len() != tag.frames() {
            return Err(IpcError::FrameCount {
                tag: envelope.tag,
                expected: tag.frames(),
                got: envelope.frames.len(),
            });
        }

        let frame = envelope.frames.first().map(|f| f.as_ref()).unwrap_or_default();
        Ok(match tag {
            Tag::End => Message::End,
            Tag::Init => Message::Init,
            Tag::Ready => Message::Ready,
            Tag::InfoReq => Message::InfoReq,
            Tag::Conf => Message::Conf(serde_json::from_slice(frame)?),
            Tag::InfoRep => Message::InfoRep(serde_json::from_slice(frame)?),
            Tag::Log => Message::Log(serde_json::from_slice(frame)?),
            Tag::MetricUpdate => Message::MetricUpdate(serde_json::from_slice(frame)?),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::End => write!(f, "IPC_END"),
            Message::Init => write!(f, "INIT"),
            Message::Conf(config) => write!(f, "CONF(worker {})", config.worker_id),
            Message::Ready => write!(f, "READY"),
            Message::InfoReq => write!(f, "INFO_REQ"),
            Message::InfoRep(_) => write!(f, "INFO_REP"),
            Message::Log(_) => write!(f, "LOG"),
            Message::MetricUpdate(result) => {
                write!(f, "METRIC_UPDATE(attribute {})", result.attribute_id)
            }
        }
    }
}
