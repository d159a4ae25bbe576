use anyhow::{anyhow, Result};
use regex_lite::Regex;

use super::types::{CdpDevice, CdpNeighbor};

/// Parse a `show cdp neighbors detail` capture.
/// The hostname is taken from the prompt in front of the first `#`.
pub fn parse_cdp_detail(text: &str, hostname: Option<&str>) -> Result<CdpDevice> {
    let prompt = Regex::new(r"^([^#]*)#").map_err(|e| anyhow!("Bad prompt regex: {}", e))?;
    let hostname = match hostname {
        Some(h) => h.to_string(),
        None => prompt
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    };

    let device_id = Regex::new(r"Device ID:\s*(\S+)").map_err(|e| anyhow!("Bad regex: {}", e))?;
    let ip_address = Regex::new(r"IP(?:v4)? [Aa]ddress:\s*(\S+)").map_err(|e| anyhow!("Bad regex: {}", e))?;
    let platform = Regex::new(r"Platform:\s*([^,\n]+)").map_err(|e| anyhow!("Bad regex: {}", e))?;
    let interface = Regex::new(r"Interface:\s*([^,\n]+)").map_err(|e| anyhow!("Bad regex: {}", e))?;
    let port_id = Regex::new(r"Port ID \(outgoing port\):\s*(\S+)").map_err(|e| anyhow!("Bad regex: {}", e))?;

    let first = |re: &Regex, block: &str| -> String {
        re.captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };

    let mut neighbors = Vec::new();
    for block in text.split("Device ID:").skip(1) {
        let block = format!("Device ID:{}", block);
        neighbors.push(CdpNeighbor {
            device_id: first(&device_id, &block),
            ip_address: first(&ip_address, &block),
            platform: first(&platform, &block),
            local_port: first(&interface, &block),
            remote_port: first(&port_id, &block),
        });
    }

    tracing::debug!("CDP {}: {} neighbors", hostname, neighbors.len());
    Ok(CdpDevice { hostname, neighbors })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &str = "\
edge-rtr1#show cdp neighbors detail
-------------------------
Device ID: core-sw1.lab.local
Entry address(es):
  IP address: 10.0.0.2
Platform: cisco WS-C3850-24T,  Capabilities: Switch IGMP
Interface: GigabitEthernet0/0,  Port ID (outgoing port): GigabitEthernet1/0/1
Holdtime : 140 sec

-------------------------
Device ID: edge-rtr2
Entry address(es):
  IP address: 10.0.0.6
Platform: Cisco CSR1000V,  Capabilities: Router IGMP
Interface: GigabitEthernet0/1,  Port ID (outgoing port): GigabitEthernet0/1
Holdtime : 170 sec

edge-rtr1#
";

    #[test]
    fn test_parse_cdp_detail() {
        let dev = parse_cdp_detail(CAPTURE, None).unwrap();
        assert_eq!(dev.hostname, "edge-rtr1");
        assert_eq!(dev.neighbors.len(), 2);

        let n = &dev.neighbors[0];
        assert_eq!(n.device_id, "core-sw1.lab.local");
        assert_eq!(n.ip_address, "10.0.0.2");
        assert_eq!(n.platform, "cisco WS-C3850-24T");
        assert_eq!(n.local_port, "GigabitEthernet0/0");
        assert_eq!(n.remote_port, "GigabitEthernet1/0/1");

        assert_eq!(dev.neighbors[1].ip_address, "10.0.0.6");
    }

    #[test]
    fn test_parse_cdp_without_neighbors() {
        let dev = parse_cdp_detail("sw9#show cdp neighbors detail\n", None).unwrap();
        assert_eq!(dev.hostname, "sw9");
        assert!(dev.neighbors.is_empty());
    }
}
