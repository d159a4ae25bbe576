use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{CiscoDevice, DeviceCollection};

const L3_HEADER: [&str; 11] = [
    "NameInt", "Desc", "Vrf", "SubInt", "IPv4", "IPv4Sec", "Status", "HSRP_Num", "HSRP_IP",
    "HSRP_Pri", "IP_Helper",
];

const ALL_L3_HEADER: [&str; 14] = [
    "Hostname", "NameInt", "Desc", "Vrf", "SubInt", "IPv4", "IPv4Sec", "IPV_Net", "Status",
    "AccessList", "HSRP_Num", "HSRP_IP", "HSRP_Pri", "IP_Helper",
];

const L2_HEADER: [&str; 10] = [
    "NameInt", "Desc", "status", "mode", "access_vlan", "trunk_allowed", "channel_group",
    "channel_mode", "span_tree", "speed",
];

const NET_HEADER: [&str; 5] = ["Networks", "Hostname", "Interface", "IP_Address", "Desc"];

const CDP_HEADER: [&str; 6] = [
    "LocalName", "LocalPort", "RemoteName", "RemotePort", "RemotePlatform", "RemoteIP",
];

/// Semicolon separated report writer rooted in one output directory
pub struct ReportWriter {
    out_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(out_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output dir {}", out_dir.display()))?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
        })
    }

    fn open(&self, file_name: &str) -> Result<Writer<File>> {
        let path = self.out_dir.join(file_name);
        tracing::info!("Writing {}", path.display());
        WriterBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))
    }

    /// Every report enabled by the extracted data
    pub fn write_all(&self, collection: &DeviceCollection) -> Result<()> {
        for device in &collection.devices {
            self.device_vlans(device)?;
            self.device_l3(device)?;
            self.device_l2(device)?;
        }
        if collection.devices.iter().any(|d| !d.vlan_entries.is_empty()) {
            self.all_vlans(collection)?;
        }
        if collection.devices.iter().any(|d| !d.l3_int_entries.is_empty()) {
            self.all_l3(collection)?;
            self.all_net_l3(collection)?;
        }
        if collection.devices.iter().any(|d| !d.l2_int_entries.is_empty()) {
            self.all_l2(collection)?;
        }
        if !collection.cdp_devices.is_empty() {
            self.cdp(collection)?;
        }
        Ok(())
    }

    /// `<host>_vlans.csv`
    pub fn device_vlans(&self, device: &CiscoDevice) -> Result<()> {
        if device.vlan_entries.is_empty() {
            return Ok(());
        }
        let mut wtr = self.open(&format!("{}_vlans.csv", device.hostname.to_lowercase()))?;
        wtr.write_record(["Vlan", "Name"])?;
        for vlan in &device.vlan_entries {
            wtr.write_record([vlan.vlan.to_string().as_str(), vlan.name.as_deref().unwrap_or("")])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn all_vlans(&self, collection: &DeviceCollection) -> Result<()> {
        let mut wtr = self.open("all_vlans.csv")?;
        wtr.write_record(["Vlan", "Name", "Hostname"])?;
        for device in &collection.devices {
            for vlan in &device.vlan_entries {
                wtr.write_record([
                    vlan.vlan.to_string().as_str(),
                    vlan.name.as_deref().unwrap_or(""),
                    device.hostname.as_str(),
                ])?;
            }
        }
        wtr.flush()?;
        Ok(())
    }

    /// `<host>_l3_int.csv`, only interfaces that carry a primary address
    pub fn device_l3(&self, device: &CiscoDevice) -> Result<()> {
        if device.l3_int_entries.is_empty() {
            return Ok(());
        }
        let mut wtr = self.open(&format!("{}_l3_int.csv", device.hostname.to_lowercase()))?;
        wtr.write_record(L3_HEADER)?;
        for rec in device.l3_records().into_iter().filter(|r| !r.ipv4.is_empty()) {
            wtr.write_record([
                &rec.name, &rec.desc, &rec.vrf, &rec.subint, &rec.ipv4, &rec.ipv4_sec, &rec.status,
                &rec.hsrp_num, &rec.hsrp_ip, &rec.hsrp_pri, &rec.ip_helper,
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn all_l3(&self, collection: &DeviceCollection) -> Result<()> {
        let mut wtr = self.open("all_l3_int.csv")?;
        wtr.write_record(ALL_L3_HEADER)?;
        let mut separator = vec!["====="; 1];
        separator.extend(std::iter::repeat("").take(ALL_L3_HEADER.len() - 1));
        for device in &collection.devices {
            wtr.write_record(&separator)?;
            for rec in device.l3_records().into_iter().filter(|r| !r.ipv4.is_empty()) {
                wtr.write_record([
                    &device.hostname, &rec.name, &rec.desc, &rec.vrf, &rec.subint, &rec.ipv4,
                    &rec.ipv4_sec, &rec.ipv4_net, &rec.status, &rec.access_list, &rec.hsrp_num,
                    &rec.hsrp_ip, &rec.hsrp_pri, &rec.ip_helper,
                ])?;
            }
        }
        wtr.flush()?;
        Ok(())
    }

    /// `all_net_l3_int.csv`: one row per network followed by its members
    pub fn all_net_l3(&self, collection: &DeviceCollection) -> Result<()> {
        let mut wtr = self.open("all_net_l3_int.csv")?;
        wtr.write_record(NET_HEADER)?;
        for (net, members) in collection.l3_network_groups() {
            wtr.write_record([net.as_str()])?;
            for m in members {
                wtr.write_record(["", m.hostname.as_str(), m.interface.as_str(), m.ip.as_str(), m.desc.as_str()])?;
            }
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn device_l2(&self, device: &CiscoDevice) -> Result<()> {
        if device.l2_int_entries.is_empty() {
            return Ok(());
        }
        let mut wtr = self.open(&format!("{}_l2_int.csv", device.hostname.to_lowercase()))?;
        wtr.write_record(L2_HEADER)?;
        for intf in &device.l2_int_entries {
            wtr.write_record(intf.columns())?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn all_l2(&self, collection: &DeviceCollection) -> Result<()> {
        let mut wtr = self.open("all_l2_int.csv")?;
        let mut header = vec!["HostName"];
        header.extend(L2_HEADER);
        wtr.write_record(&header)?;
        for device in &collection.devices {
            let host = device.hostname.to_uppercase();
            for intf in &device.l2_int_entries {
                let mut row = vec![host.as_str()];
                row.extend(intf.columns());
                wtr.write_record(&row)?;
            }
        }
        wtr.flush()?;
        Ok(())
    }

    /// `<host>_cdp.csv` per capture plus `all_cdp.csv`
    pub fn cdp(&self, collection: &DeviceCollection) -> Result<()> {
        let mut all = self.open("all_cdp.csv")?;
        all.write_record(CDP_HEADER)?;
        for device in &collection.cdp_devices {
            let mut wtr = self.open(&format!("{}_cdp.csv", device.hostname))?;
            wtr.write_record(CDP_HEADER)?;
            for n in &device.neighbors {
                let row = [
                    &device.hostname, &n.local_port, &n.device_id, &n.remote_port, &n.platform,
                    &n.ip_address,
                ];
                wtr.write_record(row)?;
                all.write_record(row)?;
            }
            wtr.flush()?;
        }
        all.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::ROUTER;
    use super::super::types::L3Interface;
    use super::super::{cdp, ExtractFlags};
    use super::*;

    fn collection() -> DeviceCollection {
        let flags = ExtractFlags { l3_int: true, l2_int: true, vlans: true };
        let mut router = CiscoDevice::from_text(ROUTER, flags).unwrap();
        router.l3_int_entries.push(L3Interface {
            name: "Loopback9".into(),
            desc: "unnumbered".into(),
            ..Default::default()
        });
        let mut bare = CiscoDevice::from_text("hostname sw2\n", flags).unwrap();
        bare.file_input = PathBuf::from("sw2.cfg");
        DeviceCollection {
            devices: vec![router, bare],
            cdp_devices: vec![cdp::parse_cdp_detail(
                "Rtr-A#sh cdp nei det\nDevice ID: sw2\n  IP address: 10.0.0.9\nPlatform: cisco C9300,  Capabilities: Switch\nInterface: Gi0/3,  Port ID (outgoing port): Gi1/0/48\n",
                None,
            )
            .unwrap()],
        }
    }

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    #[test]
    fn test_write_all_reports() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        ReportWriter::new(&out).unwrap().write_all(&collection()).unwrap();

        let vlans = read(&out, "edge-rtr1_vlans.csv");
        assert!(vlans.starts_with("Vlan;Name\n10;USERS\n20;\n"));
        assert!(!out.join("sw2_vlans.csv").exists());

        let all_vlans = read(&out, "all_vlans.csv");
        assert!(all_vlans.starts_with("Vlan;Name;Hostname\n10;USERS;EDGE-RTR1\n"));

        let l3 = read(&out, "edge-rtr1_l3_int.csv");
        assert!(l3.starts_with("NameInt;Desc;Vrf;SubInt;IPv4;IPv4Sec;Status;HSRP_Num;HSRP_IP;HSRP_Pri;IP_Helper\n"));
        assert!(!l3.contains("Loopback9"));
        assert!(l3.contains("GigabitEthernet0/1.100;;CUST;100;10.100.0.1/24;10.101.0.1/24;;1;10.100.0.254;110;10.0.0.5, 10.0.0.6\n"));

        let all_l3 = read(&out, "all_l3_int.csv");
        assert!(all_l3.starts_with(
            "Hostname;NameInt;Desc;Vrf;SubInt;IPv4;IPv4Sec;IPV_Net;Status;AccessList;HSRP_Num;HSRP_IP;HSRP_Pri;IP_Helper\n=====;;;;;;;;;;;;;\n"
        ));
        assert!(!all_l3.contains("Loopback9"));
        // one separator per device, including devices without routed interfaces
        assert_eq!(all_l3.matches("=====;;;;;;;;;;;;;\n").count(), 2);
        assert!(all_l3.contains("EDGE-RTR1;GigabitEthernet0/0;uplink to isp;;;198.51.100.2/30;;198.51.100.0/30;;ACL_IN in;;;;\n"));

        let nets = read(&out, "all_net_l3_int.csv");
        assert!(nets.starts_with("Networks;Hostname;Interface;IP_Address;Desc\n"));
        assert!(nets.contains("10.100.0.0/24\n;EDGE-RTR1;GigabitEthernet0/1.100;10.100.0.1/24;\n"));

        let l2 = read(&out, "edge-rtr1_l2_int.csv");
        assert!(l2.starts_with("NameInt;Desc;status;mode;access_vlan;trunk_allowed;channel_group;channel_mode;span_tree;speed\n"));

        let all_l2 = read(&out, "all_l2_int.csv");
        assert!(all_l2.starts_with(
            "HostName;NameInt;Desc;status;mode;access_vlan;trunk_allowed;channel_group;channel_mode;span_tree;speed\n"
        ));
        assert!(all_l2.contains("EDGE-RTR1;GigabitEthernet0/3;server port;;trunk;;10,20;5;mode active;portfast;1000\n"));

        let cdp = read(&out, "Rtr-A_cdp.csv");
        assert!(cdp.contains("Rtr-A;Gi0/3;sw2;Gi1/0/48;cisco C9300;10.0.0.9\n"));
        assert!(read(&out, "all_cdp.csv").starts_with("LocalName;LocalPort;RemoteName;RemotePort;RemotePlatform;RemoteIP\n"));
    }

    #[test]
    fn test_no_reports_for_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        ReportWriter::new(dir.path()).unwrap().write_all(&DeviceCollection::default()).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
