use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nms_poller::{
    actors::{
        logger::LogSinkActor, supervisor::SupervisorHandle, tsdb::MetricsWriterActor,
        worker::PollerWorker,
    },
    config::{Config, read_config_file},
    ipc::{
        control::ControlClient,
        handshake::{CONNECT_ATTEMPTS, CONNECT_DELAY},
        log::{IpcLogLayer, LogShipper},
        push::PullServer,
    },
    poller::PluginRegistry,
    tsdb::open_writer,
    util::get_config_path,
};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Records buffered between the accept tasks and a sink
const SINK_CAPACITY: usize = 1024;

/// Time children get to exit after `IPC_END` before they are killed
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, default_value_t = get_config_path())]
    file: String,

    #[command(subcommand)]
    command: Role,
}

#[derive(Debug, Clone, Subcommand)]
enum Role {
    /// Run the supervisor and spawn every other process
    Supervise {
        /// Only run the supervisor, the other processes are started elsewhere
        #[arg(long)]
        no_spawn: bool,
    },
    /// Run one poller worker
    Worker,
    /// Run the log sink
    Logger,
    /// Run the metrics writer
    TsdbWriter,
}

fn init(ipc_source: Option<String>) -> Option<LogShipper> {
    let filter = filter::Targets::new().with_targets(vec![
        ("nms_poller", LevelFilter::DEBUG),
        ("nms_pollerd", LevelFilter::TRACE),
        ("worker", LevelFilter::TRACE),
    ]);

    let (ipc_layer, shipper) = match ipc_source {
        Some(source) => {
            let (layer, shipper) = IpcLogLayer::new(source);
            (Some(layer), Some(shipper))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(ipc_layer)
        .with(filter)
        .init();

    shipper
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    match args.command {
        Role::Worker => {
            let shipper = init(Some(format!("worker-{}", std::process::id())));
            trace!("started with args: {args:?}");

            // the poll loop is single-threaded by construction
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build worker runtime")?;
            runtime.block_on(run_worker(&args.file, shipper))
        }
        Role::Supervise { no_spawn } => {
            init(None);
            trace!("started with args: {args:?}");
            runtime()?.block_on(supervise(&args.file, no_spawn))
        }
        Role::Logger => {
            init(None);
            trace!("started with args: {args:?}");
            runtime()?.block_on(run_logger(&args.file))
        }
        Role::TsdbWriter => {
            init(None);
            trace!("started with args: {args:?}");
            runtime()?.block_on(run_tsdb_writer(&args.file))
        }
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to build runtime")
}

fn load_config(file: &str) -> anyhow::Result<Config> {
    read_config_file(file).with_context(|| format!("failed to load configuration from {file}"))
}

#[instrument]
async fn supervise(file: &str, no_spawn: bool) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let supervisor = SupervisorHandle::spawn(&config).await?;
    info!(
        control = %supervisor.endpoints.control,
        handshake = %supervisor.endpoints.handshake,
        info = %supervisor.endpoints.info,
        "supervisor listening"
    );

    let mut children = vec![];
    if !no_spawn {
        let exe = std::env::current_exe().context("failed to locate own executable")?;
        let mut roles = vec!["logger", "tsdb-writer"];
        roles.extend(std::iter::repeat_n("worker", config.workers.max(1)));

        for role in roles {
            let child = Command::new(&exe)
                .args(["-f", file, role])
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to spawn {role}"))?;
            debug!(role, pid = child.id(), "spawned child process");
            children.push((role, child));
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    supervisor.shutdown().await?;
    for (role, child) in children {
        reap(role, child).await;
    }

    Ok(())
}

async fn reap(role: &str, mut child: Child) {
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => debug!(role, "child exited"),
        Ok(Ok(status)) => warn!(role, "child exited with {status}"),
        Ok(Err(e)) => error!(role, "failed to wait for child: {e}"),
        Err(_) => {
            warn!(role, "child did not stop, killing it");
            if let Err(e) = child.kill().await {
                error!(role, "failed to kill child: {e}");
            }
        }
    }
}

async fn run_worker(file: &str, shipper: Option<LogShipper>) -> anyhow::Result<()> {
    let config = load_config(file)?;

    let mut worker = PollerWorker::new(config.topology, Arc::new(PluginRegistry::with_defaults()));
    if let Some(shipper) = shipper {
        worker = worker.with_log_shipper(shipper);
    }

    match worker.run().await {
        Ok(report) => {
            debug!("worker report: {report:?}");
            Ok(())
        }
        Err(e) => {
            error!("worker failed: {e:#}");
            Err(e)
        }
    }
}

async fn run_logger(file: &str) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let records = PullServer::bind(config.topology.log_sink, SINK_CAPACITY)
        .await
        .with_context(|| format!("failed to bind log sink {}", config.topology.log_sink))?;
    let control = ControlClient::connect(config.topology.control, CONNECT_ATTEMPTS, CONNECT_DELAY)
        .await
        .context("failed to connect to control channel")?;

    let received = LogSinkActor::new(records, control).run().await;
    debug!("log sink handled {received} records");
    Ok(())
}

async fn run_tsdb_writer(file: &str) -> anyhow::Result<()> {
    let config = load_config(file)?;
    let writer = open_writer(&config.tsdb)
        .await
        .context("failed to open metric writer")?;
    let health = writer
        .health_check()
        .await
        .context("metric writer health check failed")?;
    if !health.healthy {
        anyhow::bail!("metric writer is unhealthy: {}", health.message);
    }
    debug!(message = %health.message, "metric writer healthy");

    let updates = PullServer::bind(config.topology.metrics_writer, SINK_CAPACITY)
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics writer {}",
                config.topology.metrics_writer
            )
        })?;
    let control = ControlClient::connect(config.topology.control, CONNECT_ATTEMPTS, CONNECT_DELAY)
        .await
        .context("failed to connect to control channel")?;

    let stats = MetricsWriterActor::new(writer, updates, control).run().await;
    debug!("metrics writer stats: {stats:?}");
    Ok(())
}
