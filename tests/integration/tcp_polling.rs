//! TCP service polling end to end

use nms_poller::poller::PollValue;
use pretty_assertions::assert_eq;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::helpers::*;

/// Accepts connections and greets each with `banner`
async fn start_service(banner: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(banner.as_bytes()).await;
        }
    });
    port
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn state(value: Option<&PollValue>) -> Option<String> {
    match value {
        Some(PollValue::Tuple(parts)) => parts.first().map(ToString::to_string),
        _ => None,
    }
}

#[tokio::test]
async fn test_open_and_closed_ports() {
    let open = start_service("").await;
    let closed = closed_port().await;
    let host = create_test_host(None, COMMUNITY);

    let results = run_cycle(vec![
        create_test_attribute(1, host.clone(), &open.to_string(), &[], &[("tcp_status", "")]),
        create_test_attribute(2, host, &closed.to_string(), &[], &[("tcp_status", "")]),
    ])
    .await;

    assert_eq!(results.len(), 2);
    assert_eq!(state(results[0].value_of("tcp_status")).as_deref(), Some("open"));
    assert_eq!(state(results[1].value_of("tcp_status")).as_deref(), Some("closed"));

    let Some(PollValue::Tuple(open_parts)) = results[0].value_of("tcp_status") else {
        panic!("tcp_status is not a tuple");
    };
    assert_eq!(open_parts[1], PollValue::Null);
    assert!(matches!(open_parts[2], PollValue::Float(secs) if secs >= 0.0));
    assert_eq!(open_parts[3], PollValue::Null);

    let Some(PollValue::Tuple(closed_parts)) = results[1].value_of("tcp_status") else {
        panic!("tcp_status is not a tuple");
    };
    assert!(matches!(closed_parts[3], PollValue::Text(_)));
}

#[tokio::test]
async fn test_content_check_chain() {
    let port = start_service("SSH-2.0-OpenSSH_9.6\r\n").await;
    let host = create_test_host(None, COMMUNITY);
    let chain = [("tcp_status", "1"), ("tcp_content", "")];

    let results = run_cycle(vec![
        create_test_attribute(
            1,
            host.clone(),
            &port.to_string(),
            &[("check_content", "1"), ("check_regexp", "^ssh-2")],
            &chain,
        ),
        create_test_attribute(
            2,
            host,
            &port.to_string(),
            &[("check_content", "1"), ("check_regexp", "^220 ")],
            &chain,
        ),
    ])
    .await;

    assert_eq!(
        results[0].value_of("tcp_content"),
        Some(&PollValue::Tuple(vec![
            PollValue::from("valid"),
            PollValue::from("SSH-2.0-OpenSSH_9.6"),
        ]))
    );
    assert_eq!(
        results[1].value_of("tcp_content"),
        Some(&PollValue::Tuple(vec![
            PollValue::from("invalid"),
            PollValue::from("Not Found"),
        ]))
    );
}

#[tokio::test]
async fn test_closed_port_content_has_no_data() {
    let port = closed_port().await;
    let host = create_test_host(None, COMMUNITY);

    let results = run_cycle(vec![create_test_attribute(
        1,
        host,
        &port.to_string(),
        &[("check_content", "1"), ("check_regexp", ".")],
        &[("tcp_status", "1"), ("tcp_content", "")],
    )])
    .await;

    assert_eq!(state(results[0].value_of("tcp_status")).as_deref(), Some("closed"));
    assert_eq!(
        results[0].value_of("tcp_content"),
        Some(&PollValue::Tuple(vec![
            PollValue::from("invalid"),
            PollValue::from("missing buffer"),
        ]))
    );
}
