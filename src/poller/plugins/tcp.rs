//! TCP service pollers
//!
//! - `tcp_status`: connect to the port in the attribute index and
//!   optionally read the first lines the service sends
//! - `tcp_content`: match what `tcp_status` read against `check_regexp`
//! - `snmp_tcp_established`: count established connections on the port
//!   from the device's `tcpConnTable`

use std::net::SocketAddr;

use regex::RegexBuilder;
use tracing::{trace, warn};

use crate::engine::error::EngineResult;
use crate::poller::{Engine, PollJob, PollValue, PollerContext, PollerPlugin};
use crate::snmp::{self, Oid, VarBind, oid_suffix};
use crate::tcp::{TcpCheck, TcpResponse};
use crate::Attribute;

use super::parse_port;

/// Buffer key shared by `tcp_status` and `tcp_content`
pub const TCP_CONTENT: &str = "tcp_content";

/// tcpConnTable.tcpConnEntry.tcpConnState
const TCP_CONN_STATE: [u32; 10] = [1, 3, 6, 1, 2, 1, 6, 13, 1, 1];

/// tcpConnState value of an established connection
const ESTABLISHED: i64 = 5;

/// Characters of matched content reported back
const MATCH_PREVIEW: usize = 40;

pub struct TcpStatus;

impl PollerPlugin for TcpStatus {
    fn name(&self) -> &'static str {
        "tcp_status"
    }

    /// Params: `<max_bytes>`, the amount of data to gather when
    /// `check_content` is set. Counted in lines, `0` reads everything.
    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool {
        let attribute = job.attribute.clone();
        let Some(port) = parse_port(&attribute.index) else {
            warn!(attribute = attribute.id, index = %attribute.index, "attribute index is not a port");
            let reason = format!("bad port {}", attribute.index);
            ctx.poller_callback(engine, &job, PollValue::invalid(reason));
            return false;
        };

        let max_lines = match attribute.field("check_content") {
            Some("1") => Some(job.params.trim().parse().unwrap_or(1)),
            _ => None,
        };
        let check = TcpCheck {
            send: attribute.field("tcp_send").unwrap_or_default().to_string(),
            max_lines,
        };
        let target = SocketAddr::new(attribute.host.mgmt_address, port);
        trace!(attribute = attribute.id, %target, ?max_lines, "checking tcp port");

        engine.get_tcp(target, check, move |engine, ctx, result| {
            if let Ok(TcpResponse {
                content: Some(content),
                ..
            }) = &result
            {
                ctx.buffer
                    .put(job.attribute.id, TCP_CONTENT, content.trim_end().into());
            }
            ctx.poller_callback(engine, &job, tcp_status_value(&result));
        });
        true
    }
}

/// `(state, response, connect_time, error)`
pub fn tcp_status_value(result: &EngineResult<TcpResponse>) -> PollValue {
    match result {
        Ok(response) => PollValue::Tuple(vec![
            "open".into(),
            response
                .content
                .as_deref()
                .map(str::trim_end)
                .into(),
            PollValue::Float(response.connect_time.as_secs_f64()),
            PollValue::Null,
        ]),
        Err(e) => PollValue::Tuple(vec![
            "closed".into(),
            PollValue::Null,
            PollValue::Null,
            PollValue::Text(e.to_string()),
        ]),
    }
}

pub struct TcpContent;

impl PollerPlugin for TcpContent {
    fn name(&self) -> &'static str {
        "tcp_content"
    }

    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool {
        let buffered = ctx.buffer.get(job.attribute.id, TCP_CONTENT);
        let (value, proceed) = check_content(&job.attribute, buffered);
        ctx.poller_callback(engine, &job, value);
        proceed
    }
}

/// Match buffered service content against the attribute's `check_regexp`
///
/// Returns the `(valid|invalid, text)` value and whether the chain goes on.
pub fn check_content(attribute: &Attribute, buffered: Option<&PollValue>) -> (PollValue, bool) {
    let verdict = |state: &str, text: String| {
        PollValue::Tuple(vec![state.into(), PollValue::Text(text)])
    };

    if attribute.field("check_content") != Some("1") {
        return (verdict("valid", "not checked".to_string()), false);
    }

    let data = match buffered {
        None => return (verdict("invalid", "missing buffer".to_string()), false),
        Some(PollValue::Text(text)) => text.clone(),
        Some(PollValue::Null) => String::new(),
        Some(other) => other.to_string(),
    };
    if data.is_empty() {
        return (verdict("invalid", "no data".to_string()), false);
    }

    let regex = attribute
        .field("check_regexp")
        .and_then(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build().ok());
    let Some(regex) = regex else {
        warn!(attribute = attribute.id, "bad check_regexp");
        return (verdict("invalid", "bad regexp configured".to_string()), false);
    };

    if regex.is_match(&data) {
        (verdict("valid", data.chars().take(MATCH_PREVIEW).collect()), true)
    } else {
        (verdict("invalid", "Not Found".to_string()), true)
    }
}

pub struct SnmpTcpEstablished;

impl PollerPlugin for SnmpTcpEstablished {
    fn name(&self) -> &'static str {
        "snmp_tcp_established"
    }

    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool {
        let attribute = job.attribute.clone();
        let Some(port) = parse_port(&attribute.index) else {
            let reason = format!("bad port {}", attribute.index);
            ctx.poller_callback(engine, &job, PollValue::invalid(reason));
            return false;
        };

        let root = Oid::from_slice(&TCP_CONN_STATE);
        engine.get_table(&attribute.host, root.clone(), None, move |engine, ctx, outcome| {
            let value = match outcome.values {
                Some(rows) => PollValue::Int(count_established(&root, &rows, port) as i64),
                None => PollValue::Null,
            };
            ctx.poller_callback(engine, &job, value);
        });
        true
    }
}

/// Count `tcpConnState` rows in state established whose local port is `port`
///
/// Row index: local address (4 arcs), local port, remote address, remote port.
pub fn count_established(root: &Oid, rows: &[VarBind], port: u16) -> usize {
    rows.iter()
        .filter(|row| snmp::as_i64(&row.value) == Some(ESTABLISHED))
        .filter(|row| {
            oid_suffix(&row.oid, root)
                .and_then(|suffix| suffix.get(4))
                .is_some_and(|local_port| *local_port == u32::from(port))
        })
        .count()
}
