//! Built-in poller plugins

pub mod cisco_saagent;
pub mod snmp;
pub mod tcp;

/// Parse an attribute index holding a TCP port
fn parse_port(index: &str) -> Option<u16> {
    index.trim().parse().ok().filter(|port| *port != 0)
}
