//! Supervisor, worker and metrics writer running together
//!
//! All endpoints bind port 0; the topology handed to the worker is
//! assembled from the addresses actually bound.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nms_poller::{
    actors::{
        supervisor::SupervisorHandle, tsdb::MetricsWriterActor, worker::PollerWorker,
    },
    config::{Config, Topology},
    ipc::{
        Message,
        control::ControlClient,
        framing::connect,
        handshake::HandshakeClient,
        info::{INFO_TIMEOUT, get_info},
        log::IpcLogLayer,
        push::PullServer,
    },
    poller::{PluginRegistry, PollValue},
    tsdb::MemoryWriter,
};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing_subscriber::layer::SubscriberExt;

fn supervisor_config(workers: usize, service_port: u16) -> Config {
    let json = format!(
        r#"{{
            "workers": {workers},
            "interval": 1,
            "engine": {{ "tcp_timeout_ms": 500, "poll_wait_ms": 20 }},
            "topology": {{
                "control": "127.0.0.1:0",
                "handshake": "127.0.0.1:0",
                "info": "127.0.0.1:0"
            }},
            "hosts": [ {{ "id": 1, "mgmt_address": "127.0.0.1" }} ],
            "attributes": [
                {{ "id": 1, "host": 1, "index": "{service_port}", "pollers": [ {{ "plugin": "tcp_status" }} ] }}
            ]
        }}"#
    );
    serde_json::from_str(&json).unwrap()
}

async fn start_service() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut open = vec![];
        while let Ok((stream, _)) = listener.accept().await {
            open.push(stream);
        }
    });
    port
}

async fn wait_ready(supervisor: &SupervisorHandle, ready: usize) {
    for _ in 0..200 {
        if supervisor.status().await.unwrap().ready >= ready {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("workers did not become ready");
}

fn worker_topology(supervisor: &SupervisorHandle, metrics_writer: SocketAddr) -> Topology {
    Topology {
        metrics_writer,
        // nothing listens here, log shipping is not under test
        log_sink: "127.0.0.1:9".parse().unwrap(),
        ..supervisor.endpoints.clone()
    }
}

/// Record when each message reaches `server`
fn record_arrivals(mut server: PullServer) -> (Arc<Mutex<Vec<Instant>>>, JoinHandle<()>) {
    let arrivals = Arc::new(Mutex::new(vec![]));
    let recorded = arrivals.clone();
    let task = tokio::spawn(async move {
        while server.recv().await.is_some() {
            recorded.lock().unwrap().push(Instant::now());
        }
    });
    (arrivals, task)
}

#[tokio::test]
async fn test_results_flow_and_end_stops_everyone() {
    let service_port = start_service().await;
    let supervisor = SupervisorHandle::spawn(&supervisor_config(1, service_port))
        .await
        .unwrap();

    let memory = Arc::new(MemoryWriter::new());
    let updates = PullServer::bind("127.0.0.1:0".parse().unwrap(), 64)
        .await
        .unwrap();
    let metrics_writer = updates.local_addr();
    let writer_control = ControlClient::connect(supervisor.endpoints.control, 10, Duration::from_millis(10))
        .await
        .unwrap();
    let writer = tokio::spawn(MetricsWriterActor::new(memory.clone(), updates, writer_control).run());

    let worker = PollerWorker::new(
        worker_topology(&supervisor, metrics_writer),
        Arc::new(PluginRegistry::with_defaults()),
    );
    let worker = tokio::spawn(worker.run());

    wait_ready(&supervisor, 1).await;
    let info = get_info(supervisor.endpoints.info, INFO_TIMEOUT).await.unwrap();
    assert_eq!(info["configured"], 1);

    // first cycle starts right after READY
    sleep(Duration::from_millis(500)).await;
    supervisor.shutdown().await.unwrap();

    let report = timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker did not stop after IPC_END")
        .unwrap()
        .unwrap();
    let stats = timeout(Duration::from_secs(1), writer)
        .await
        .expect("writer did not stop after IPC_END")
        .unwrap();

    assert!(report.cycles >= 1);
    assert!(report.results_sent >= 1);
    assert_eq!(report.results_dropped, 0);
    assert_eq!(stats.written, report.results_sent);

    let results = memory.results().await;
    assert_eq!(results.len() as u64, report.results_sent);
    let Some(PollValue::Tuple(status)) = results[0].value_of("tcp_status") else {
        panic!("unexpected result {:?}", results[0]);
    };
    assert_eq!(status[0], PollValue::from("open"));
}

#[tokio::test]
async fn test_failed_handshake_returns_partition() {
    let supervisor = SupervisorHandle::spawn(&supervisor_config(1, 22)).await.unwrap();
    let handshake = supervisor.endpoints.handshake;

    // takes the only partition and disappears without READY
    let mut quitter = connect(handshake, 1, Duration::ZERO).await.unwrap();
    quitter.send(Message::Init).await.unwrap();
    let conf = timeout(Duration::from_secs(1), quitter.next()).await.unwrap();
    assert!(matches!(conf, Some(Ok(Message::Conf(_)))));
    drop(quitter);

    for _ in 0..200 {
        if supervisor.status().await.unwrap().configured == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let (client, config) = HandshakeClient::init_and_config(handshake, Duration::from_secs(1))
        .await
        .unwrap();
    client.ready().await.unwrap();
    assert_eq!(config.worker_id, 0);
    assert_eq!(config.attributes.len(), 1);

    wait_ready(&supervisor, 1).await;
    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_without_supervisor_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let topology = Topology {
        control: addr,
        handshake: addr,
        ..Topology::default()
    };
    let worker = PollerWorker::new(topology, Arc::new(PluginRegistry::with_defaults()));

    // control connect retries for a while before giving up
    let result = timeout(Duration::from_secs(10), worker.run()).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_nothing_ships_after_worker_returns() {
    let service_port = start_service().await;
    let supervisor = SupervisorHandle::spawn(&supervisor_config(1, service_port))
        .await
        .unwrap();

    let log_sink = PullServer::bind("127.0.0.1:0".parse().unwrap(), 1024)
        .await
        .unwrap();
    let metrics_sink = PullServer::bind("127.0.0.1:0".parse().unwrap(), 1024)
        .await
        .unwrap();
    let topology = Topology {
        log_sink: log_sink.local_addr(),
        metrics_writer: metrics_sink.local_addr(),
        ..supervisor.endpoints.clone()
    };
    let (logs, log_collector) = record_arrivals(log_sink);
    let (metrics, metrics_collector) = record_arrivals(metrics_sink);

    // the runtime is single-threaded, the worker task logs through this layer
    let (layer, shipper) = IpcLogLayer::new("worker-test");
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

    let worker = PollerWorker::new(topology, Arc::new(PluginRegistry::with_defaults()))
        .with_log_shipper(shipper);
    let worker = tokio::spawn(worker.run());

    wait_ready(&supervisor, 1).await;
    sleep(Duration::from_millis(500)).await;
    supervisor.shutdown().await.unwrap();

    let report = timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker did not stop after IPC_END")
        .unwrap()
        .unwrap();
    let returned = Instant::now();

    // longer than the poll interval: a worker still running would ship another cycle
    sleep(Duration::from_millis(1500)).await;
    log_collector.abort();
    metrics_collector.abort();

    let logs = logs.lock().unwrap().clone();
    let metrics = metrics.lock().unwrap().clone();
    assert!(!logs.is_empty());
    assert_eq!(metrics.len() as u64, report.results_sent);
    assert!(report.results_sent >= 1);

    // bytes already written may still be in flight when run() returns
    let grace = returned + Duration::from_millis(100);
    assert!(logs.iter().all(|at| *at <= grace), "log record after worker returned");
    assert!(metrics.iter().all(|at| *at <= grace), "result after worker returned");
}

#[tokio::test]
async fn test_end_while_metrics_sink_stalled() {
    let service_port = start_service().await;
    let supervisor = SupervisorHandle::spawn(&supervisor_config(1, service_port))
        .await
        .unwrap();

    // a listener that never accepts, with its accept queue filled up
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let stalled = socket.listen(1).unwrap();
    let stalled_addr = stalled.local_addr().unwrap();
    let mut backlog = vec![];
    for _ in 0..4 {
        if let Ok(Ok(stream)) = timeout(Duration::from_millis(100), TcpStream::connect(stalled_addr)).await {
            backlog.push(stream);
        }
    }

    let worker = PollerWorker::new(
        worker_topology(&supervisor, stalled_addr),
        Arc::new(PluginRegistry::with_defaults()),
    );
    let worker = tokio::spawn(worker.run());

    wait_ready(&supervisor, 1).await;
    sleep(Duration::from_millis(500)).await;
    let end_sent = Instant::now();
    supervisor.shutdown().await.unwrap();

    let report = timeout(Duration::from_secs(1), worker)
        .await
        .expect("stalled metrics sink kept the worker from stopping")
        .unwrap()
        .unwrap();

    assert!(end_sent.elapsed() < Duration::from_secs(1));
    assert!(report.cycles >= 1);
    assert!(report.results_sent + report.results_dropped >= 1);
    drop(stalled);
}
