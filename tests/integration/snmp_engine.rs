//! SNMP requests through the request engine against a local agent
//!
//! - GET with the right and a wrong community
//! - defaults on failure
//! - table walks: unreachable vs empty
//! - SNMP plugins end to end
//! - hostile error-index values in responses

use nms_poller::{
    engine::{RequestEngine, StrReply},
    poller::PollValue,
    snmp::{self, SnmpValue, WalkOutcome},
};
use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::helpers::*;

async fn fetch_str(port: Option<u16>, community: &str, oid_text: &str, default: Option<&str>) -> StrReply {
    let mut engine: RequestEngine<Vec<StrReply>> = RequestEngine::new(fast_engine_config());
    let mut replies = vec![];

    let host = create_test_host(port, community);
    engine.get_str(
        &host,
        oid(oid_text),
        default.map(str::to_string),
        |_, replies: &mut Vec<StrReply>, reply| replies.push(reply),
    );
    while engine.poll(&mut replies).await {}

    assert_eq!(replies.len(), 1, "continuation must run exactly once");
    replies.remove(0)
}

async fn walk(port: Option<u16>, community: &str, root: &str) -> WalkOutcome {
    let mut engine: RequestEngine<Vec<WalkOutcome>> = RequestEngine::new(fast_engine_config());
    let mut outcomes = vec![];

    let host = create_test_host(port, community);
    engine.get_table(&host, oid(root), None, |_, outcomes: &mut Vec<WalkOutcome>, outcome| {
        outcomes.push(outcome)
    });
    while engine.poll(&mut outcomes).await {}

    outcomes.remove(0)
}

#[tokio::test]
async fn test_get_with_right_community() {
    let agent = FakeAgent::standard().await;

    let reply = fetch_str(Some(agent.port()), COMMUNITY, SYS_OBJECT_ID, None).await;
    assert_eq!(reply.value.as_deref(), Some(NET_SNMP_AGENT));
    assert!(reply.error.is_none());
}

#[tokio::test]
async fn test_wrong_community_falls_back_to_default() {
    let agent = FakeAgent::standard().await;

    let reply = fetch_str(Some(agent.port()), "private", SYS_OBJECT_ID, Some("42")).await;
    assert_eq!(reply.value.as_deref(), Some("42"));
    assert!(reply.error.is_none());
}

#[tokio::test]
async fn test_wrong_community_without_default_reports_error() {
    let agent = FakeAgent::standard().await;

    let reply = fetch_str(Some(agent.port()), "private", SYS_OBJECT_ID, None).await;
    assert_eq!(reply.value, None);
    assert!(reply.error.is_some());
}

#[tokio::test]
async fn test_missing_object_falls_back_to_default() {
    let agent = FakeAgent::standard().await;

    let reply = fetch_str(Some(agent.port()), COMMUNITY, "1.3.6.1.2.1.1.99.0", Some("42")).await;
    assert_eq!(reply.value.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_get_list_keeps_request_order() {
    let agent = FakeAgent::standard().await;
    let mut engine: RequestEngine<Vec<Option<Vec<SnmpValue>>>> =
        RequestEngine::new(fast_engine_config());
    let mut replies = vec![];

    let host = create_test_host(Some(agent.port()), COMMUNITY);
    engine.get_list(
        &host,
        vec![oid("1.3.6.1.2.1.1.5.0"), oid("1.3.6.1.2.1.1.1.0")],
        None,
        |_, replies: &mut Vec<Option<Vec<SnmpValue>>>, reply| replies.push(reply.values),
    );
    while engine.poll(&mut replies).await {}

    assert_eq!(
        replies,
        vec![Some(vec![
            snmp::octets("test-host"),
            snmp::octets("Linux test 6.1"),
        ])]
    );
}

#[tokio::test]
async fn test_table_walk_returns_subtree_rows() {
    let agent = FakeAgent::standard().await;

    let outcome = walk(Some(agent.port()), COMMUNITY, TCP_CONN_STATE).await;
    let rows = outcome.values.unwrap();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| snmp::oid_suffix(&row.oid, &oid(TCP_CONN_STATE)).is_some()));
}

#[tokio::test]
async fn test_empty_table_differs_from_unreachable() {
    let agent = FakeAgent::standard().await;

    // valid subtree without rows
    let empty = walk(Some(agent.port()), COMMUNITY, "1.3.6.1.2.1.4.20").await;
    assert_eq!(empty.values, Some(vec![]));
    assert!(empty.error.is_none());

    // agent never answers this community
    let unreachable = walk(Some(agent.port()), "private", TCP_CONN_STATE).await;
    assert_eq!(unreachable.values, None);
    assert!(unreachable.error.is_some());
}

#[tokio::test]
async fn test_snmp_value_plugin() {
    let agent = FakeAgent::standard().await;
    let host = create_test_host(Some(agent.port()), COMMUNITY);
    let silent = create_test_host(Some(agent.port()), "private");
    let with_default = format!("{SYS_OBJECT_ID}|42");

    let results = run_cycle(vec![
        create_test_attribute(1, host, "", &[], &[("snmp_value", SYS_OBJECT_ID)]),
        create_test_attribute(2, silent, "", &[], &[("snmp_value", with_default.as_str())]),
    ])
    .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].value_of("snmp_value"), Some(&PollValue::from(NET_SNMP_AGENT)));
    assert_eq!(results[1].value_of("snmp_value"), Some(&PollValue::from("42")));
}

#[tokio::test]
async fn test_snmp_tcp_established_counts_port() {
    let agent = FakeAgent::standard().await;
    let host = create_test_host(Some(agent.port()), COMMUNITY);

    let results = run_cycle(vec![
        create_test_attribute(1, host.clone(), "22", &[], &[("snmp_tcp_established", "")]),
        create_test_attribute(2, host.clone(), "80", &[], &[("snmp_tcp_established", "")]),
        create_test_attribute(3, host, "443", &[], &[("snmp_tcp_established", "")]),
    ])
    .await;

    let counts: Vec<_> = results
        .iter()
        .map(|r| r.value_of("snmp_tcp_established").cloned())
        .collect();
    assert_eq!(
        counts,
        vec![
            Some(PollValue::Int(2)),
            Some(PollValue::Int(1)),
            Some(PollValue::Int(0)),
        ]
    );
}

#[tokio::test]
async fn test_cisco_saagent_against_agent() {
    let base = "1.3.6.1.4.1.9.9.42.1.5.2.1";
    let column = |c: u32| snmp::child_oid(&oid(base), &[c, 7]);
    let agent = FakeAgent::start(vec![
        // packet loss: received, rtt sum, fwd lost, bwd lost
        (column(1), SnmpValue::Integer(90)),
        (column(2), SnmpValue::Integer(1800)),
        (column(26), SnmpValue::Integer(10)),
        (column(27), SnmpValue::Integer(0)),
        // forward jitter: samples, sum, samples, sum
        (column(8), SnmpValue::Integer(10)),
        (column(9), SnmpValue::Integer(30)),
        (column(13), SnmpValue::Integer(10)),
        (column(14), SnmpValue::Integer(50)),
    ])
    .await;
    let host = create_test_host(Some(agent.port()), COMMUNITY);

    let results = run_cycle(vec![
        create_test_attribute(1, host.clone(), "7", &[], &[("cisco_saagent", "7|packetloss")]),
        create_test_attribute(2, host.clone(), "7", &[], &[("cisco_saagent", "7|fwd_jitter")]),
        // columns missing on the agent
        create_test_attribute(3, host, "7", &[], &[("cisco_saagent", "7|bwd_jitter")]),
    ])
    .await;

    assert_eq!(
        results[0].value_of("cisco_saagent"),
        Some(&PollValue::Tuple(vec![
            PollValue::Float(10.0),
            PollValue::Float(0.0),
            PollValue::Float(20.0),
        ]))
    );
    assert_eq!(results[1].value_of("cisco_saagent"), Some(&PollValue::Float(4.0)));
    assert_eq!(results[2].value_of("cisco_saagent"), Some(&PollValue::Null));
}

/// Read one BER TLV from the front of `data`: (tag, content, rest)
fn read_tlv(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, data) = data.split_first()?;
    let (&first, mut data) = data.split_first()?;
    let len = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let octets = usize::from(first & 0x7f);
        let (len_bytes, rest) = data.split_at_checked(octets)?;
        data = rest;
        len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
    };
    let (content, rest) = data.split_at_checked(len)?;
    Some((tag, content, rest))
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    match content.len() {
        len @ 0..=0x7f => out.push(len as u8),
        len @ 0x80..=0xff => out.extend([0x81, len as u8]),
        len => out.extend([0x82, (len >> 8) as u8, len as u8]),
    }
    out.extend_from_slice(content);
    out
}

/// Agent answering every request with noSuchName at error-index `i64::MIN`
async fn hostile_error_index_agent() -> (u16, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Some((_, message, _)) = read_tlv(&buf[..len]) else {
                continue;
            };
            let Some((_, version, rest)) = read_tlv(message) else {
                continue;
            };
            let Some((_, community, rest)) = read_tlv(rest) else {
                continue;
            };
            let Some((_, pdu, _)) = read_tlv(rest) else {
                continue;
            };
            let Some((_, request_id, rest)) = read_tlv(pdu) else {
                continue;
            };
            // skip error-status and error-index of the request
            let Some(varbinds) = read_tlv(rest)
                .and_then(|(_, _, rest)| read_tlv(rest))
                .and_then(|(_, _, rest)| read_tlv(rest))
                .map(|(_, varbinds, _)| varbinds)
            else {
                continue;
            };

            let mut body = tlv(0x02, request_id);
            body.extend(tlv(0x02, &[0x02]));
            body.extend(tlv(0x02, &i64::MIN.to_be_bytes()));
            body.extend(tlv(0x30, varbinds));

            let mut response = tlv(0x02, version);
            response.extend(tlv(0x04, community));
            response.extend(tlv(0xa2, &body));
            let _ = socket.send_to(&tlv(0x30, &response), peer).await;
        }
    });

    (port, task)
}

#[tokio::test]
async fn test_hostile_error_index_is_reported_not_fatal() {
    let (port, agent) = hostile_error_index_agent().await;

    let reply = fetch_str(Some(port), COMMUNITY, SYS_OBJECT_ID, None).await;
    assert_eq!(reply.value, None);
    assert!(reply.error.is_some());

    // the engine keeps serving requests afterwards
    let reply = fetch_str(Some(port), COMMUNITY, SYS_OBJECT_ID, Some("42")).await;
    assert_eq!(reply.value.as_deref(), Some("42"));
    assert!(reply.error.is_none());

    agent.abort();
}
