use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nms_poller::{config::Topology, ipc::info::get_info};
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Info endpoint of the supervisor, defaults to the standard topology
    #[arg(short, long)]
    addr: Option<SocketAddr>,

    /// Milliseconds to wait for the answer
    #[arg(short, long, default_value_t = 1000)]
    timeout: u64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("nms_poller", LevelFilter::WARN),
        ("nms_info", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let addr = args.addr.unwrap_or_else(|| Topology::default().info);
    match get_info(addr, Duration::from_millis(args.timeout)).await {
        Some(info) => {
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("no answer from {addr}");
            Ok(ExitCode::FAILURE)
        }
    }
}
