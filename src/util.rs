use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const NMS_BASE_PORT: &str = "NMS_BASE_PORT";

const DEFAULT_BASE_PORT: u16 = 5000;

const DEFAULT_SNMP_PORT: u16 = 161;

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

pub fn get_default_snmp_port() -> u16 {
    DEFAULT_SNMP_PORT
}

/// First port of the IPC topology (logger, tsdb, control, info, handshake)
pub fn get_base_port() -> u16 {
    let port_from_env = std::env::var(NMS_BASE_PORT);
    port_from_env.map_or(DEFAULT_BASE_PORT, |res| {
        res.parse().unwrap_or(DEFAULT_BASE_PORT)
    })
}

/// Endpoint `offset` ports above the base port on the loopback address
pub fn get_endpoint(offset: u16) -> SocketAddr {
    SocketAddr::new(DEFAULT_ADDR, get_base_port().saturating_add(offset))
}

const NMS_CONFIG: &str = "NMS_CONFIG";

const DEFAULT_CONFIG: &str = "./nms-poller.json";

pub fn get_config_path() -> String {
    std::env::var(NMS_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}
