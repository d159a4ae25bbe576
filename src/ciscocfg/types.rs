use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::utils::netmask_to_prefix;

// --- L3 interfaces ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L3Key {
    Name,
    Desc,
    Subint,
    Vrf,
    Status,
    AccessList,
    Ipv4,
    Ipv4Sec,
    HsrpNum,
    HsrpIp,
    HsrpPri,
    IpHelper,
}

/// Field patterns; the value is capture 1 of `<pattern>\s?(.*)`
pub const L3_KEYS: &[(L3Key, &str)] = &[
    (L3Key::Name, r"^interface"),
    (L3Key::Desc, r"^\s*description"),
    (L3Key::Subint, r"^interface\s*[^\.]*.(\d*)$"),
    (L3Key::Vrf, r"vrf\s*forwarding"),
    (L3Key::Status, r"\s*(shutdown)"),
    (L3Key::AccessList, r"\s*ip\s*access-group"),
    (L3Key::Ipv4, r"^\s*ip\s*address\s*(\d*\.\d*\.\d*\.\d*\s*\d*\.\d*\.\d*\.\d*)\s*$"),
    (L3Key::Ipv4Sec, r"ip\s*address\s*(\d*\.\d*\.\d*\.\d*\s*\d*\.\d*\.\d*\.\d*)\s*secondary"),
    (L3Key::HsrpNum, r"^\s*standby\s*(\d*)\s*ip\s*(.*)"),
    (L3Key::HsrpIp, r"^\s*standby\s*\d*\s*ip\s*(.*)"),
    (L3Key::HsrpPri, r"^\s*standby\s*\d*\s*priority\s*(.*)"),
    (L3Key::IpHelper, r"^\s*ip helper-address"),
];

/// Routed interface as extracted from the config, address fields still "addr mask"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct L3Interface {
    pub name: String,
    pub desc: String,
    pub subint: String,
    pub status: String,
    pub ipv4: String,
    pub ipv4_sec: String,
    pub net: String,
    pub hsrp_num: String,
    pub hsrp_ip: String,
    pub hsrp_pri: String,
    pub ip_helper: String,
    pub access_list: String,
    pub vrf: String,
}

/// Report view of an [`L3Interface`] with prefix-length addresses and the derived network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L3Record {
    pub name: String,
    pub desc: String,
    pub subint: String,
    pub status: String,
    pub ipv4: String,
    pub ipv4_net: String,
    pub ipv4_sec: String,
    pub net: String,
    pub hsrp_num: String,
    pub hsrp_ip: String,
    pub hsrp_pri: String,
    pub ip_helper: String,
    pub access_list: String,
    pub vrf: String,
}

impl L3Interface {
    pub fn field_mut(&mut self, key: L3Key) -> &mut String {
        match key {
            L3Key::Name => &mut self.name,
            L3Key::Desc => &mut self.desc,
            L3Key::Subint => &mut self.subint,
            L3Key::Vrf => &mut self.vrf,
            L3Key::Status => &mut self.status,
            L3Key::AccessList => &mut self.access_list,
            L3Key::Ipv4 => &mut self.ipv4,
            L3Key::Ipv4Sec => &mut self.ipv4_sec,
            L3Key::HsrpNum => &mut self.hsrp_num,
            L3Key::HsrpIp => &mut self.hsrp_ip,
            L3Key::HsrpPri => &mut self.hsrp_pri,
            L3Key::IpHelper => &mut self.ip_helper,
        }
    }

    /// Append a value; repeated matches are joined with ", "
    pub fn push_field(&mut self, key: L3Key, value: &str) {
        let field = self.field_mut(key);
        if field.is_empty() {
            *field = value.to_string();
        } else {
            field.push_str(", ");
            field.push_str(value);
        }
    }

    pub fn record(&self) -> L3Record {
        let (ipv4, ipv4_net) = match addr_mask_to_cidr(&self.ipv4) {
            Some((addr, net)) => (addr, net),
            None => (String::new(), String::new()),
        };
        // several secondaries are joined with ", "
        let ipv4_sec = self
            .ipv4_sec
            .split(',')
            .filter_map(|pair| addr_mask_to_cidr(pair).map(|(addr, _)| addr))
            .collect::<Vec<_>>()
            .join(", ");

        if !self.ipv4.is_empty() && ipv4.is_empty() {
            tracing::warn!("Interface {}: cannot convert address '{}'", self.name, self.ipv4);
        }

        L3Record {
            name: self.name.clone(),
            desc: self.desc.clone(),
            subint: self.subint.clone(),
            status: self.status.clone(),
            ipv4,
            ipv4_net,
            ipv4_sec,
            net: self.net.clone(),
            hsrp_num: self.hsrp_num.clone(),
            hsrp_ip: self.hsrp_ip.clone(),
            hsrp_pri: self.hsrp_pri.clone(),
            ip_helper: self.ip_helper.clone(),
            access_list: self.access_list.clone(),
            vrf: self.vrf.clone(),
        }
    }
}

/// "10.0.0.1 255.255.255.0" -> ("10.0.0.1/24", "10.0.0.0/24")
pub fn addr_mask_to_cidr(pair: &str) -> Option<(String, String)> {
    let mut parts = pair.split_whitespace();
    let addr: Ipv4Addr = parts.next()?.parse().ok()?;
    let prefix = netmask_to_prefix(parts.next()?)?;
    let net = Ipv4Network::new(addr, prefix).ok()?;
    Some((
        format!("{}/{}", addr, prefix),
        format!("{}/{}", net.network(), prefix),
    ))
}

// --- L2 interfaces ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Key {
    Name,
    Desc,
    Mode,
    Status,
    AccessVlan,
    TrunkAllowed,
    ChannelGroup,
    ChannelMode,
    SpanTree,
    Speed,
}

pub const L2_KEYS: &[(L2Key, &str)] = &[
    (L2Key::Name, r"^interface"),
    (L2Key::Desc, r"^\s*description"),
    (L2Key::Mode, r"^\s*switchport\s*mode"),
    (L2Key::Status, r"^\s*(shutdown)"),
    (L2Key::AccessVlan, r"^\s*switchport\s*access\s*vlan"),
    (L2Key::TrunkAllowed, r"^\s*switchport\s*trunk\s*allowed\s*vlan"),
    (L2Key::ChannelGroup, r"^\s*channel-group\s*(\d*)"),
    (L2Key::ChannelMode, r"^\s*channel-group\s*\d*"),
    (L2Key::SpanTree, r"^\s*spanning-tree"),
    (L2Key::Speed, r"^\s*speed"),
];

/// Switched interface: an `interface` block without any `ip address` line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct L2Interface {
    pub name: Option<String>,
    pub desc: Option<String>,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub access_vlan: Option<String>,
    pub trunk_allowed: Option<String>,
    pub channel_group: Option<String>,
    pub channel_mode: Option<String>,
    pub span_tree: Option<String>,
    pub speed: Option<String>,
}

impl L2Interface {
    pub fn field_mut(&mut self, key: L2Key) -> &mut Option<String> {
        match key {
            L2Key::Name => &mut self.name,
            L2Key::Desc => &mut self.desc,
            L2Key::Mode => &mut self.mode,
            L2Key::Status => &mut self.status,
            L2Key::AccessVlan => &mut self.access_vlan,
            L2Key::TrunkAllowed => &mut self.trunk_allowed,
            L2Key::ChannelGroup => &mut self.channel_group,
            L2Key::ChannelMode => &mut self.channel_mode,
            L2Key::SpanTree => &mut self.span_tree,
            L2Key::Speed => &mut self.speed,
        }
    }

    /// Report columns in CSV order, absent values as empty cells
    pub fn columns(&self) -> [&str; 10] {
        [
            cell(&self.name),
            cell(&self.desc),
            cell(&self.status),
            cell(&self.mode),
            cell(&self.access_vlan),
            cell(&self.trunk_allowed),
            cell(&self.channel_group),
            cell(&self.channel_mode),
            cell(&self.span_tree),
            cell(&self.speed),
        ]
    }
}

fn cell(field: &Option<String>) -> &str {
    field.as_deref().unwrap_or("")
}

// --- VLANs ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vlan {
    pub vlan: u16,
    pub name: Option<String>,
}

// --- CDP ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdpNeighbor {
    pub device_id: String,
    pub ip_address: String,
    pub platform: String,
    pub local_port: String,
    pub remote_port: String,
}

/// Neighbors parsed from one `show cdp neighbors detail` capture
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CdpDevice {
    pub hostname: String,
    pub neighbors: Vec<CdpNeighbor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_mask_to_cidr() {
        assert_eq!(
            addr_mask_to_cidr("10.1.2.3 255.255.255.0"),
            Some(("10.1.2.3/24".to_string(), "10.1.2.0/24".to_string()))
        );
        assert_eq!(addr_mask_to_cidr("10.1.2.3"), None);
        assert_eq!(addr_mask_to_cidr("10.1.2.3 255.0.255.0"), None);
    }

    #[test]
    fn test_record_with_secondaries() {
        let intf = L3Interface {
            name: "Vlan20".into(),
            ipv4: "192.168.20.1 255.255.255.128".into(),
            ipv4_sec: "10.9.9.1 255.255.255.0, 10.8.8.1 255.255.0.0".into(),
            ..Default::default()
        };
        let rec = intf.record();
        assert_eq!(rec.ipv4, "192.168.20.1/25");
        assert_eq!(rec.ipv4_net, "192.168.20.0/25");
        assert_eq!(rec.ipv4_sec, "10.9.9.1/24, 10.8.8.1/16");
    }

    #[test]
    fn test_record_without_address() {
        let rec = L3Interface { name: "Gi0/0".into(), ..Default::default() }.record();
        assert_eq!(rec.ipv4, "");
        assert_eq!(rec.ipv4_net, "");
    }

    #[test]
    fn test_push_field_appends() {
        let mut intf = L3Interface::default();
        intf.push_field(L3Key::IpHelper, "10.0.0.5");
        intf.push_field(L3Key::IpHelper, "10.0.0.6");
        assert_eq!(intf.ip_helper, "10.0.0.5, 10.0.0.6");
    }
}
