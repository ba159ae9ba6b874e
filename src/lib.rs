pub mod actors;
pub mod config;
pub mod engine;
pub mod ipc;
pub mod poller;
pub mod snmp;
pub mod tcp;
pub mod tsdb;
pub mod util;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::snmp::SnmpVersion;

/// Identifier of a monitored attribute
pub type AttributeId = u64;

/// Identifier of a host
pub type HostId = u64;

/// Target host of one or more attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub mgmt_address: IpAddr,
    pub snmp: Option<SnmpCommunity>,
}

impl Host {
    /// Address of the SNMP agent, if the host has SNMP credentials
    pub fn snmp_addr(&self) -> Option<SocketAddr> {
        self.snmp
            .as_ref()
            .map(|snmp| SocketAddr::new(self.mgmt_address, snmp.port))
    }
}

/// Read-only SNMP credentials of a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpCommunity {
    #[serde(default)]
    pub version: SnmpVersion,
    pub community: String,
    #[serde(default = "crate::util::get_default_snmp_port")]
    pub port: u16,
}

/// One stage of an attribute's poller chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStage {
    /// Registry name of the plugin
    pub plugin: String,

    /// Plugin-specific parameter string, e.g. `"<index>|<qtype>"`
    #[serde(default)]
    pub params: String,
}

/// One monitored metric instance on a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub host: Host,
    /// Attribute index, e.g. the TCP port or an interface index
    pub index: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub pollers: Vec<PollerStage>,
}

impl Attribute {
    /// Look up a configured field, e.g. `check_content`
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}
