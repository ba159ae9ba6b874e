//! Helper functions for integration tests

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_snmp::{
    Agent, BoxFuture, GetNextResult, GetResult, MibHandler, RequestContext, Value, VarBind,
};
use nms_poller::{
    Attribute, Host, PollerStage, SnmpCommunity,
    config::EngineConfig,
    poller::{Engine, MetricResult, PluginRegistry, PollerContext},
    snmp::{self, Oid, SnmpValue, SnmpVersion},
};
use tokio::task::JoinHandle;

pub const COMMUNITY: &str = "public";

pub const SYS_OBJECT_ID: &str = "1.3.6.1.2.1.1.2.0";
pub const NET_SNMP_AGENT: &str = "1.3.6.1.4.1.8072.3.2.10";
pub const TCP_CONN_STATE: &str = "1.3.6.1.2.1.6.13.1.1";

/// Fixed MIB served by [`FakeAgent`], keyed by arcs so GET-NEXT is a range query
struct FixedMib(BTreeMap<Vec<u32>, SnmpValue>);

impl MibHandler for FixedMib {
    fn get<'a>(&'a self, _ctx: &'a RequestContext, oid: &'a Oid) -> BoxFuture<'a, GetResult> {
        Box::pin(async move {
            match self.0.get(oid.arcs()) {
                Some(value) => GetResult::Value(value.clone()),
                None => GetResult::NoSuchObject,
            }
        })
    }

    fn get_next<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        oid: &'a Oid,
    ) -> BoxFuture<'a, GetNextResult> {
        Box::pin(async move {
            match self
                .0
                .range::<[u32], _>((Bound::Excluded(oid.arcs()), Bound::Unbounded))
                .next()
            {
                Some((arcs, value)) => {
                    GetNextResult::Value(VarBind::new(Oid::from_slice(arcs), value.clone()))
                }
                None => GetNextResult::EndOfMibView,
            }
        })
    }
}

/// SNMP agent answering GET and GET-NEXT from a fixed MIB
///
/// Requests with another community are dropped, like a real agent does.
pub struct FakeAgent {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn start(mib: Vec<(Oid, SnmpValue)>) -> Self {
        let addr = free_udp_addr();
        let mib = FixedMib(
            mib.into_iter()
                .map(|(oid, value)| (oid.arcs().to_vec(), value))
                .collect(),
        );

        let agent = Agent::builder()
            .bind(&addr.to_string())
            .community(COMMUNITY.as_bytes())
            .handler(Oid::from_slice(&[1, 3, 6, 1]), Arc::new(mib))
            .build()
            .await
            .unwrap();
        let task = tokio::spawn(async move {
            let _ = agent.run().await;
        });

        Self { addr, task }
    }

    /// Agent with a system group and a small tcpConnTable
    pub async fn standard() -> Self {
        Self::start(standard_mib()).await
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Local UDP address nobody is bound to right now
fn free_udp_addr() -> SocketAddr {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .and_then(|socket| socket.local_addr())
        .unwrap()
}

pub fn oid(text: &str) -> Oid {
    snmp::parse_oid(text).unwrap()
}

/// tcpConnState row: local 10.0.0.1:`local_port`, remote 10.0.0.2:`remote_port`
pub fn tcp_conn_row(local_port: u32, remote_port: u32, state: i32) -> (Oid, SnmpValue) {
    let row = snmp::child_oid(
        &oid(TCP_CONN_STATE),
        &[10, 0, 0, 1, local_port, 10, 0, 0, 2, remote_port],
    );
    (row, Value::Integer(state))
}

pub fn standard_mib() -> Vec<(Oid, SnmpValue)> {
    vec![
        (oid("1.3.6.1.2.1.1.1.0"), snmp::octets("Linux test 6.1")),
        (oid(SYS_OBJECT_ID), Value::ObjectIdentifier(oid(NET_SNMP_AGENT))),
        (oid("1.3.6.1.2.1.1.5.0"), snmp::octets("test-host")),
        tcp_conn_row(22, 50_001, 5),
        tcp_conn_row(22, 50_002, 5),
        tcp_conn_row(22, 50_003, 2),
        tcp_conn_row(80, 50_004, 5),
    ]
}

pub fn create_test_host(snmp_port: Option<u16>, community: &str) -> Host {
    Host {
        id: 1,
        mgmt_address: "127.0.0.1".parse().unwrap(),
        snmp: snmp_port.map(|port| SnmpCommunity {
            version: SnmpVersion::V2c,
            community: community.to_string(),
            port,
        }),
    }
}

pub fn create_test_attribute(
    id: u64,
    host: Host,
    index: &str,
    fields: &[(&str, &str)],
    pollers: &[(&str, &str)],
) -> Attribute {
    Attribute {
        id,
        host,
        index: index.to_string(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        pollers: pollers
            .iter()
            .map(|(plugin, params)| PollerStage {
                plugin: plugin.to_string(),
                params: params.to_string(),
            })
            .collect(),
    }
}

/// Short timeouts so unreachable targets resolve quickly
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        snmp_timeout_ms: 100,
        snmp_retries: 1,
        tcp_timeout_ms: 500,
        poll_wait_ms: 20,
        ..EngineConfig::default()
    }
}

/// Run one poll cycle of `attributes` with the default plugins
pub async fn run_cycle(attributes: Vec<Attribute>) -> Vec<MetricResult> {
    let attributes: Vec<Arc<Attribute>> = attributes.into_iter().map(Arc::new).collect();
    let mut engine = Engine::new(fast_engine_config());
    let mut ctx = PollerContext::new(Arc::new(PluginRegistry::with_defaults()));

    ctx.start_cycle(&mut engine, &attributes);
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.poll(&mut ctx).await {}
    })
    .await
    .expect("cycle did not finish");

    let mut results = ctx.drain_results();
    results.sort_by_key(|r| r.attribute_id);
    results
}
