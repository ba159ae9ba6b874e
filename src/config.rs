use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::snmp::SnmpSettings;
use crate::util::get_endpoint;
use crate::{Attribute, AttributeId, Host, HostId, PollerStage, SnmpCommunity};

/// Addresses of every IPC endpoint
///
/// Built once at process start and handed to each component that needs an
/// endpoint. The supervisor binds `control`, `handshake` and `info`, the
/// sinks bind `log_sink` and `metrics_writer`, workers connect to all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_log_sink")]
    pub log_sink: SocketAddr,
    #[serde(default = "default_metrics_writer")]
    pub metrics_writer: SocketAddr,
    #[serde(default = "default_control")]
    pub control: SocketAddr,
    #[serde(default = "default_info")]
    pub info: SocketAddr,
    #[serde(default = "default_handshake")]
    pub handshake: SocketAddr,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            log_sink: default_log_sink(),
            metrics_writer: default_metrics_writer(),
            control: default_control(),
            info: default_info(),
            handshake: default_handshake(),
        }
    }
}

fn default_log_sink() -> SocketAddr {
    get_endpoint(0)
}

fn default_metrics_writer() -> SocketAddr {
    get_endpoint(1)
}

fn default_control() -> SocketAddr {
    get_endpoint(2)
}

fn default_info() -> SocketAddr {
    get_endpoint(3)
}

fn default_handshake() -> SocketAddr {
    get_endpoint(4)
}

/// Wait between SNMP attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every attempt waits `snmp_timeout_ms`
    #[default]
    Fixed,
    /// Attempt `n` waits `snmp_timeout_ms * 2^n`
    Exponential,
}

/// Request engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_snmp_timeout_ms")]
    pub snmp_timeout_ms: u64,
    #[serde(default = "default_snmp_retries")]
    pub snmp_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_tcp_timeout_ms")]
    pub tcp_timeout_ms: u64,
    /// Longest single wait inside `RequestEngine::poll`
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snmp_timeout_ms: default_snmp_timeout_ms(),
            snmp_retries: default_snmp_retries(),
            backoff: Backoff::default(),
            tcp_timeout_ms: default_tcp_timeout_ms(),
            poll_wait_ms: default_poll_wait_ms(),
        }
    }
}

impl EngineConfig {
    pub fn snmp_settings(&self) -> SnmpSettings {
        SnmpSettings {
            timeout: Duration::from_millis(self.snmp_timeout_ms),
            retries: self.snmp_retries,
            backoff: self.backoff,
        }
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_timeout_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }
}

fn default_snmp_timeout_ms() -> u64 {
    1000
}

fn default_snmp_retries() -> u32 {
    2
}

fn default_tcp_timeout_ms() -> u64 {
    3000
}

fn default_poll_wait_ms() -> u64 {
    100
}

/// Time-series writer backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TsdbConfig {
    /// Accept and discard results
    #[serde(rename = "none")]
    Disabled,

    /// Keep written results in memory only
    #[default]
    Memory,

    /// Append one JSON document per result
    Jsonl {
        #[serde(default = "default_jsonl_path")]
        path: PathBuf,
    },
}

fn default_jsonl_path() -> PathBuf {
    PathBuf::from("./metrics.jsonl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub id: HostId,
    pub mgmt_address: IpAddr,
    pub snmp: Option<SnmpCommunity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeConfig {
    pub id: AttributeId,
    pub host: HostId,
    #[serde(default)]
    pub index: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    pub pollers: Vec<PollerStage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub topology: Topology,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Number of poller worker processes
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Seconds between poll cycles
    #[serde(default = "default_interval")]
    pub interval: u64,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,

    #[serde(default)]
    pub tsdb: TsdbConfig,
}

fn default_workers() -> usize {
    2
}

fn default_interval() -> u64 {
    300
}

impl Config {
    /// Join every attribute with its host
    pub fn resolve_attributes(&self) -> anyhow::Result<Vec<Attribute>> {
        let hosts: HashMap<HostId, Host> = self
            .hosts
            .iter()
            .map(|host| {
                (
                    host.id,
                    Host {
                        id: host.id,
                        mgmt_address: host.mgmt_address,
                        snmp: host.snmp.clone(),
                    },
                )
            })
            .collect();

        self.attributes
            .iter()
            .map(|attribute| {
                let host = hosts
                    .get(&attribute.host)
                    .cloned()
                    .with_context(|| {
                        format!(
                            "attribute {} references unknown host {}",
                            attribute.id, attribute.host
                        )
                    })?;
                Ok(Attribute {
                    id: attribute.id,
                    host,
                    index: attribute.index.clone(),
                    fields: attribute.fields.clone(),
                    pollers: attribute.pollers.clone(),
                })
            })
            .collect()
    }

    /// Distribute the attributes round-robin over the configured workers
    pub fn partition(&self) -> anyhow::Result<Vec<WorkerConfig>> {
        let workers = self.workers.max(1);
        let mut configs: Vec<WorkerConfig> = (0..workers)
            .map(|worker_id| WorkerConfig {
                worker_id,
                interval: self.interval,
                engine: self.engine.clone(),
                attributes: vec![],
            })
            .collect();

        for (i, attribute) in self.resolve_attributes()?.into_iter().enumerate() {
            configs[i % workers].attributes.push(attribute);
        }

        Ok(configs)
    }
}

/// Configuration payload sent to a worker in the `CONF` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_id: usize,
    /// Seconds between poll cycles
    pub interval: u64,
    pub engine: EngineConfig,
    pub attributes: Vec<Attribute>,
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
