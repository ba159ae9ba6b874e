//! SNMP v1/v2c on top of `async-snmp`
//!
//! The crate owns encoding, request ids and the UDP socket.
//! [`client::SnmpSession`] adds the engine's timeout and retry policy and
//! the walk semantics plugins rely on. The helpers here give plugins a
//! numeric and a textual view of values.

pub mod client;

use serde::{Deserialize, Serialize};

pub use async_snmp::{Oid, Value as SnmpValue, VarBind};
pub use client::{SnmpSession, SnmpSettings, WalkOutcome};

use crate::engine::error::{EngineError, EngineResult};

/// Community-based SNMP versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

/// Parse a dotted object identifier, a leading dot is allowed
pub fn parse_oid(text: &str) -> EngineResult<Oid> {
    let trimmed = text.trim().trim_start_matches('.');
    let invalid = || EngineError::InvalidRequest(format!("invalid object identifier '{text}'"));

    if trimmed.is_empty() || !trimmed.split('.').all(|arc| arc.parse::<u32>().is_ok()) {
        return Err(invalid());
    }
    Oid::parse(trimmed).map_err(|_| invalid())
}

/// `root` with `arcs` appended
pub fn child_oid(root: &Oid, arcs: &[u32]) -> Oid {
    let mut child = root.arcs().to_vec();
    child.extend_from_slice(arcs);
    Oid::from_slice(&child)
}

/// Arcs following `root`, if `oid` lies in the subtree below it
pub fn oid_suffix<'a>(oid: &'a Oid, root: &Oid) -> Option<&'a [u32]> {
    oid.arcs().strip_prefix(root.arcs())
}

/// v2c exception values carried in place of a real value
pub fn is_exception(value: &SnmpValue) -> bool {
    matches!(
        value,
        SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
    )
}

/// Numeric view of a value, if it has one
///
/// Octet strings holding a decimal number count as numeric.
pub fn as_i64(value: &SnmpValue) -> Option<i64> {
    match value {
        SnmpValue::Integer(v) => Some(i64::from(*v)),
        SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
            Some(i64::from(*v))
        }
        SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
        SnmpValue::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
        _ => None,
    }
}

/// Text rendering: octet strings as text, OIDs dotted, numbers decimal
pub fn render(value: &SnmpValue) -> String {
    match value {
        SnmpValue::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        SnmpValue::ObjectIdentifier(oid) => oid.to_string(),
        SnmpValue::Integer(v) => v.to_string(),
        SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => v.to_string(),
        SnmpValue::Counter64(v) => v.to_string(),
        other => other.to_string(),
    }
}

/// Octet string value holding `text`
pub fn octets(text: &str) -> SnmpValue {
    SnmpValue::OctetString(text.as_bytes().to_vec().into())
}
