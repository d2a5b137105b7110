//! Facts about the machine running the simulator.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use boltsim_app::ports::HostProbe;
use boltsim_domain::reported::ReportedProperties;
use boltsim_domain::time;

/// Reads host name and address once; the time is read on every report.
#[derive(Debug, Clone)]
pub struct SystemHost {
    host_name: String,
    ip_address: String,
}

impl SystemHost {
    #[must_use]
    pub fn detect() -> Self {
        Self {
            host_name: host_name(),
            ip_address: local_ipv4().map(|ip| ip.to_string()).unwrap_or_default(),
        }
    }
}

impl HostProbe for SystemHost {
    fn reported_properties(&self) -> ReportedProperties {
        ReportedProperties {
            host_name: self.host_name.clone(),
            ip_address: self.ip_address.clone(),
            host_time: time::now(),
        }
    }
}

fn host_name() -> String {
    or_localhost(hostname::get().ok().and_then(|name| name.into_string().ok()))
}

fn or_localhost(name: Option<String>) -> String {
    name.map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// Connecting a UDP socket sends nothing; it only selects the outbound interface.
fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_report_non_empty_host_name() {
        let props = SystemHost::detect().reported_properties();
        assert!(!props.host_name.is_empty());
    }

    #[test]
    fn should_report_the_system_host_name() {
        let expected = hostname::get().unwrap().into_string().unwrap();
        let props = SystemHost::detect().reported_properties();
        assert_eq!(props.host_name, or_localhost(Some(expected)));
    }

    #[test]
    fn should_fall_back_to_localhost_for_blank_names() {
        assert_eq!(or_localhost(None), "localhost");
        assert_eq!(or_localhost(Some("  \n".to_string())), "localhost");
        assert_eq!(or_localhost(Some("plant-01\n".to_string())), "plant-01");
    }

    #[test]
    fn should_never_report_loopback_address() {
        let props = SystemHost::detect().reported_properties();
        assert!(!props.ip_address.starts_with("127."));
    }
}
