pub mod cdp;
pub mod parse;
pub mod reports;
pub mod types;

use anyhow::{anyhow, Context, Result};
use regex_lite::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parse::ConfigTree;
pub use types::*;

/// Which sections to extract from each configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractFlags {
    pub l3_int: bool,
    pub l2_int: bool,
    pub vlans: bool,
}

/// Structured view of one device configuration file
#[derive(Debug, Clone, Default, Serialize)]
pub struct CiscoDevice {
    pub hostname: String,
    pub file_input: PathBuf,
    pub l3_int_entries: Vec<L3Interface>,
    pub l2_int_entries: Vec<L2Interface>,
    pub vlan_entries: Vec<Vlan>,
}

fn compile_keys<K: Copy>(keys: &[(K, &str)]) -> Result<Vec<(K, Regex)>> {
    keys.iter()
        .map(|(k, pattern)| {
            Regex::new(&format!(r"{}\s?(.*)", pattern))
                .map(|re| (*k, re))
                .map_err(|e| anyhow!("Bad pattern {}: {}", pattern, e))
        })
        .collect()
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow!("Bad pattern {}: {}", pattern, e))
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

impl CiscoDevice {
    /// Read and parse a configuration file
    pub fn from_file(path: &Path, flags: ExtractFlags) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut device = Self::from_text(&text, flags)?;
        device.file_input = path.to_path_buf();
        Ok(device)
    }

    pub fn from_text(text: &str, flags: ExtractFlags) -> Result<Self> {
        let tree = ConfigTree::parse(text);
        let hostname = tree.re_match_typed(&regex(r"^hostname\s+(\S+)")?, "None");
        tracing::info!("Hostname: {}", hostname);

        let mut device = Self {
            hostname,
            ..Default::default()
        };
        if flags.l3_int {
            device.l3_int_entries = extract_l3_interfaces(&tree)?;
        }
        if flags.l2_int {
            device.l2_int_entries = extract_l2_interfaces(&tree)?;
        }
        if flags.vlans {
            device.vlan_entries = extract_vlans(&tree)?;
        }
        Ok(device)
    }

    pub fn l3_records(&self) -> Vec<L3Record> {
        self.l3_int_entries.iter().map(L3Interface::record).collect()
    }
}

/// `interface` blocks with an `ip address` child
pub fn extract_l3_interfaces(tree: &ConfigTree) -> Result<Vec<L3Interface>> {
    let keys = compile_keys(L3_KEYS)?;
    let mut entries = Vec::new();

    for obj in tree.find_objects_w_child(&regex(r"^interface")?, &regex(r"^\s*ip address")?) {
        let mut intf = L3Interface::default();
        for text in std::iter::once(obj.text()).chain(obj.children().map(|c| c.text())) {
            for (key, re) in &keys {
                let Some(raw) = capture(re, text) else { continue };
                let value = raw.split(',').next().unwrap_or("").trim();
                if !value.is_empty() {
                    tracing::trace!("Key: {:?} Val: {}", key, value);
                    intf.push_field(*key, value);
                }
            }
        }
        tracing::debug!("L3 int: {} IPv4: {}", intf.name, intf.ipv4);
        entries.push(intf);
    }
    Ok(entries)
}

/// `interface` blocks with no `ip address` / `no ip address` child
pub fn extract_l2_interfaces(tree: &ConfigTree) -> Result<Vec<L2Interface>> {
    let keys = compile_keys(L2_KEYS)?;
    let mut entries = Vec::new();

    for obj in tree.find_objects_wo_child(&regex(r"^interface")?, &regex(r"^\s*(no)?\s*ip address")?) {
        let mut intf = L2Interface::default();
        for text in std::iter::once(obj.text()).chain(obj.children().map(|c| c.text())) {
            for (key, re) in &keys {
                if let Some(raw) = capture(re, text) {
                    *intf.field_mut(*key) = Some(raw.trim().to_string());
                }
            }
        }
        tracing::debug!("L2 int: {}", intf.name.as_deref().unwrap_or(""));
        entries.push(intf);
    }
    Ok(entries)
}

/// `vlan N` blocks; `vlan 10,20-22` expands to one unnamed entry per id
pub fn extract_vlans(tree: &ConfigTree) -> Result<Vec<Vlan>> {
    let name_re = regex(r"^\s*name\s?(.*)")?;
    let mut entries = Vec::new();

    for obj in tree.find_objects(&regex(r"^vlan\s*\d+")?) {
        let spec = obj.text().split_whitespace().nth(1).unwrap_or("");
        if spec.contains([',', '-']) {
            for id in expand_vlan_list(spec) {
                entries.push(Vlan { vlan: id, name: None });
            }
            continue;
        }

        let Ok(vlan) = spec.parse::<u16>() else {
            tracing::warn!("Skipping vlan line '{}'", obj.text());
            continue;
        };
        let name = obj
            .children()
            .filter_map(|c| capture(&name_re, c.text()).map(|n| n.trim().to_string()))
            .last();
        entries.push(Vlan { vlan, name });
    }
    Ok(entries)
}

/// "10,20-22" -> [10, 20, 21, 22]
pub fn expand_vlan_list(spec: &str) -> Vec<u16> {
    let mut ids = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => match (start.trim().parse::<u16>(), end.trim().parse::<u16>()) {
                (Ok(start), Ok(end)) => ids.extend(start..=end),
                _ => tracing::warn!("Bad vlan range '{}'", part),
            },
            None => match part.parse::<u16>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::warn!("Bad vlan id '{}'", part),
            },
        }
    }
    ids
}

/// One row of the network grouping report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetMember {
    pub hostname: String,
    pub interface: String,
    pub ip: String,
    pub desc: String,
}

/// Configurations (and optional CDP captures) loaded from glob patterns
#[derive(Debug, Default, Serialize)]
pub struct DeviceCollection {
    pub devices: Vec<CiscoDevice>,
    pub cdp_devices: Vec<CdpDevice>,
}

impl DeviceCollection {
    pub fn load(config_glob: &str, cdp_glob: Option<&str>, flags: ExtractFlags) -> Result<Self> {
        let mut collection = Self::default();

        if let Some(pattern) = cdp_glob {
            for path in expand_glob(pattern)? {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read CDP file {}", path.display()))?;
                collection.cdp_devices.push(cdp::parse_cdp_detail(&text, None)?);
            }
        }

        let files = expand_glob(config_glob)?;
        tracing::info!("Found configuration files: {}", files.len());
        for path in files {
            collection.devices.push(CiscoDevice::from_file(&path, flags)?);
        }
        Ok(collection)
    }

    /// Interfaces with an address, grouped by network and sorted
    pub fn l3_network_groups(&self) -> BTreeMap<String, Vec<NetMember>> {
        let mut groups: BTreeMap<String, Vec<NetMember>> = BTreeMap::new();
        for device in &self.devices {
            for rec in device.l3_records() {
                if rec.ipv4_net.is_empty() {
                    continue;
                }
                groups.entry(rec.ipv4_net.clone()).or_default().push(NetMember {
                    hostname: device.hostname.clone(),
                    interface: rec.name,
                    ip: rec.ipv4,
                    desc: rec.desc,
                });
            }
        }
        groups
    }
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|e| anyhow!("Bad glob {}: {}", pattern, e))?;
    let mut files: Vec<PathBuf> = paths.flatten().filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}
