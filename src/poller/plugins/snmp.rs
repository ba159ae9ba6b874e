use tracing::warn;

use crate::poller::{Engine, PollJob, PollValue, PollerContext, PollerPlugin};
use crate::snmp::parse_oid;

/// Scalar SNMP value rendered as text
///
/// Params: `<oid>[|<default>]`. Without a default an unreachable agent or
/// missing object yields `Null`.
pub struct SnmpValuePoller;

impl PollerPlugin for SnmpValuePoller {
    fn name(&self) -> &'static str {
        "snmp_value"
    }

    fn poll(&self, job: PollJob, engine: &mut Engine, ctx: &mut PollerContext) -> bool {
        let (oid, default) = match job.params.split_once('|') {
            Some((oid, default)) => (oid, Some(default.to_string())),
            None => (job.params.as_str(), None),
        };
        let oid = match parse_oid(oid) {
            Ok(oid) => oid,
            Err(_) => {
                warn!(attribute = job.attribute.id, params = %job.params, "bad oid");
                let reason = format!("bad oid {}", oid.trim());
                ctx.poller_callback(engine, &job, PollValue::invalid(reason));
                return false;
            }
        };

        let host = job.attribute.host.clone();
        engine.get_str(&host, oid, default, move |engine, ctx, reply| {
            ctx.poller_callback(engine, &job, reply.value.into());
        });
        true
    }
}
