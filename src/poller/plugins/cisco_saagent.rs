//! Cisco SA Agent (IP SLA) jitter and packet loss
//!
//! Params: `<index>|<qtype>` where `qtype` is `fwd_jitter`, `bwd_jitter`
//! or `packetloss`. Each query reads four columns of
//! `rttMonJitterStatsEntry` for the operation `index` in one GET.

use std::str::FromStr;

use tracing::{trace, warn};

use crate::poller::{Engine, PollJob, PollValue, PollerContext, PollerPlugin};
use crate::snmp::{self, Oid, SnmpValue, child_oid};

/// rttMonJitterStatsEntry
const BASE_OID: [u32; 13] = [1, 3, 6, 1, 4, 1, 9, 9, 42, 1, 5, 2, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaQuery {
    FwdJitter,
    BwdJitter,
    PacketLoss,
}

impl SaQuery {
    /// Columns fetched for this query, in callback order
    pub fn columns(&self) -> [u32; 4] {
        match self {
            SaQuery::FwdJitter => [8, 9, 13, 14],
            SaQuery::BwdJitter => [18, 19, 23, 24],
            SaQuery::PacketLoss => [1, 2, 26, 27],
        }
    }

    pub fn oids(&self, index: u32) -> Vec<Oid> {
        let base = Oid::from_slice(&BASE_OID);
        self.columns()
            .iter()
            .map(|column| child_oid(&base, &[*column, index]))
            .collect()
    }
}

impl FromStr for SaQuery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fwd_jitter" => Ok(SaQuery::FwdJitter),
            "bwd_jitter" => Ok(SaQuery::BwdJitter),
            "packetloss" => Ok(SaQuery::PacketLoss),
            other => Err(format!("bad query type {other}")),
        }
    }
}

fn parse_params(params: &str) -> Result<(u32, SaQuery), String> {
    let (index, qtype) = params
        .split_once('|')
        .ok_or_else(|| format!("bad parameters {params}"))?;
    let index = index
        .trim()
        .parse()
        .map_err(|_| format!("bad index {index}"))?;
    Ok((index, qtype.trim().parse()?))
}

pub struct CiscoSaAgent;

impl PollerPlugin for CiscoSaAgent {
    fn name(&self) -> &'static str {
        "cisco_saagent"
    }

    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool {
        let (index, query) = match parse_params(&job.params) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(attribute = job.attribute.id, "{reason}");
                ctx.poller_callback(engine, &job, PollValue::invalid(reason));
                return false;
            }
        };

        trace!(attribute = job.attribute.id, index, ?query, "querying sa agent");
        let host = job.attribute.host.clone();
        engine.get_list(&host, query.oids(index), None, move |engine, ctx, reply| {
            let value = match reply.values {
                Some(values) if values.len() == 4 => sa_value(query, &values),
                _ => PollValue::Null,
            };
            ctx.poller_callback(engine, &job, value);
        });
        true
    }
}

fn sa_value(query: SaQuery, values: &[SnmpValue]) -> PollValue {
    match query {
        SaQuery::FwdJitter | SaQuery::BwdJitter => {
            let samples: Option<Vec<i64>> = values.iter().map(snmp::as_i64).collect();
            let jitter = samples
                .and_then(|samples| <[i64; 4]>::try_from(samples).ok())
                .map_or(0.0, jitter);
            PollValue::Float(jitter)
        }
        SaQuery::PacketLoss => {
            let samples: Option<Vec<i64>> = values.iter().map(snmp::as_i64).collect();
            match samples.and_then(|samples| <[i64; 4]>::try_from(samples).ok()) {
                Some(samples) => {
                    let (fwd, bwd, rtt) = packet_loss(samples);
                    PollValue::Tuple(vec![fwd.into(), bwd.into(), rtt.into()])
                }
                None => PollValue::Null,
            }
        }
    }
}

/// `(v1 + v3) / (v0 + v2)`: sum of jitter over number of samples
pub fn jitter(values: [i64; 4]) -> f64 {
    let samples = values[0] as f64 + values[2] as f64;
    if samples <= 0.0 {
        return 0.0;
    }
    (values[1] as f64 + values[3] as f64) / samples
}

/// Forward loss %, backward loss % and average RTT
///
/// `values` = received packets, RTT sum, forward lost, backward lost.
/// Counters are unsigned on the device, a negative sample yields zeros.
pub fn packet_loss(values: [i64; 4]) -> (f64, f64, f64) {
    if values.iter().any(|v| *v < 0) {
        return (0.0, 0.0, 0.0);
    }
    let [received, rtt_sum, fwd_lost, bwd_lost] = values.map(|v| v as f64);
    if received <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    (
        fwd_lost / (fwd_lost + received) * 100.0,
        bwd_lost / (bwd_lost + received) * 100.0,
        rtt_sum / received,
    )
}
