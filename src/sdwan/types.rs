use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Prefix length assumed when a vpn0 address is given without one
const DEFAULT_VPN0_PREFIX: u8 = 24;

// --- Configuration file ---

#[derive(Debug, Clone, Deserialize)]
pub struct SdwanConfig {
    pub all: SdwanGlobal,
    pub controllers: ControllersSpec,
    #[serde(default)]
    pub vedges: IndexMap<String, DeviceSpec>,
    #[serde(default)]
    pub cedges: IndexMap<String, DeviceSpec>,
    #[serde(default)]
    pub templates: Vec<ViptelaTemplate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SdwanGlobal {
    #[serde(default)]
    pub tftp_server: String,
    pub org: String,
    pub user: String,
    pub pass: String,
    pub site_id: u32,
    #[serde(default)]
    pub serial_file: String,
    pub cert_path: String,
    #[serde(default)]
    pub gen_rootca: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllersSpec {
    pub vmanage: DeviceSpec,
    pub vsmart: DeviceSpec,
    pub vbond: DeviceSpec,
}

/// One device entry as written in the YAML file
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSpec {
    pub vm_name: String,
    pub interface_vpn0: String,
    pub interface_mgmt: String,
    pub mgmt_ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub vpn0_ip: String,
    pub sys_ip: String,
    #[serde(default)]
    pub default_route_vpn0: String,
    #[serde(default)]
    pub site_id: Option<u32>,
    #[serde(default)]
    pub vm_model: Option<String>,
    #[serde(default)]
    pub add_routes: Vec<String>,
}

// --- Devices ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Vmanage,
    Vsmart,
    Vbond,
    Vedge,
    Cedge,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vmanage => "vmanage",
            Self::Vsmart => "vsmart",
            Self::Vbond => "vbond",
            Self::Vedge => "vedge",
            Self::Cedge => "cedge",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a vpn0 address into the bare IP and its CIDR form
pub fn split_vpn0(raw: &str) -> Result<(String, String)> {
    let raw = raw.trim();
    if raw.contains('/') {
        let net: Ipv4Network = raw.parse().map_err(|e| anyhow!("Invalid vpn0 address '{}': {}", raw, e))?;
        Ok((net.ip().to_string(), format!("{}/{}", net.ip(), net.prefix())))
    } else {
        let ip: Ipv4Addr = raw.parse().map_err(|e| anyhow!("Invalid vpn0 address '{}': {}", raw, e))?;
        Ok((ip.to_string(), format!("{}/{}", ip, DEFAULT_VPN0_PREFIX)))
    }
}

/// vManage, vSmart or vBond
#[derive(Debug, Clone, Serialize)]
pub struct Controller {
    pub dv_type: DeviceKind,
    pub name: String,
    pub int_vpn0: String,
    pub int_mgmt: String,
    pub mgmt_ip: String,
    pub port: Option<u16>,
    pub vpn0_ip: String,
    pub vpn0_cidr: String,
    pub sys_ip: String,
    pub default_route_vpn0: String,
    pub add_routes: Vec<String>,
    pub init_config: String,
}

impl Controller {
    pub fn from_spec(dv_type: DeviceKind, spec: &DeviceSpec) -> Result<Self> {
        let (vpn0_ip, vpn0_cidr) = split_vpn0(&spec.vpn0_ip)?;
        Ok(Self {
            dv_type,
            name: spec.vm_name.clone(),
            int_vpn0: spec.interface_vpn0.clone(),
            int_mgmt: spec.interface_mgmt.clone(),
            mgmt_ip: spec.mgmt_ip.clone(),
            port: spec.port,
            vpn0_ip,
            vpn0_cidr,
            sys_ip: spec.sys_ip.clone(),
            default_route_vpn0: spec.default_route_vpn0.clone(),
            add_routes: spec.add_routes.clone(),
            init_config: String::new(),
        })
    }
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "controller: {}", self.dv_type)?;
        writeln!(f, "  name: {}", self.name)?;
        writeln!(f, "  int_vpn0: {}", self.int_vpn0)?;
        writeln!(f, "  int_mgmt: {}", self.int_mgmt)?;
        writeln!(f, "  mgmt_ip: {}", self.mgmt_ip)?;
        writeln!(f, "  vpn0_ip: {}", self.vpn0_cidr)?;
        writeln!(f, "  sys_ip: {}", self.sys_ip)?;
        write!(f, "  default_route_vpn0: {}", self.default_route_vpn0)
    }
}

/// The three controllers, always configured in this order
#[derive(Debug, Clone)]
pub struct Controllers {
    pub vmanage: Controller,
    pub vsmart: Controller,
    pub vbond: Controller,
}

impl Controllers {
    pub fn iter(&self) -> impl Iterator<Item = &Controller> {
        [&self.vmanage, &self.vsmart, &self.vbond].into_iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Controller> {
        [&mut self.vmanage, &mut self.vsmart, &mut self.vbond].into_iter()
    }
}

/// vEdge cloud router or IOS-XE cEdge
#[derive(Debug, Clone, Serialize)]
pub struct Vedge {
    pub dv_type: DeviceKind,
    pub name: String,
    pub int_vpn0: String,
    pub int_mgmt: String,
    pub mgmt_ip: String,
    pub vpn0_ip: String,
    pub vpn0_cidr: String,
    pub sys_ip: String,
    pub default_route_vpn0: String,
    pub site_id: u32,
    pub vm_model: String,
    pub add_routes: Vec<String>,
    pub reg_chassis: String,
    pub reg_token: String,
    pub init_config: String,
}

impl Vedge {
    pub fn from_spec(dv_type: DeviceKind, key: &str, spec: &DeviceSpec) -> Result<Self> {
        let (vpn0_ip, vpn0_cidr) = split_vpn0(&spec.vpn0_ip)?;
        let site_id = spec.site_id.ok_or_else(|| anyhow!("{} {}: site_id is required", dv_type, key))?;
        let vm_model = spec
            .vm_model
            .clone()
            .ok_or_else(|| anyhow!("{} {}: vm_model is required", dv_type, key))?;
        Ok(Self {
            dv_type,
            name: spec.vm_name.clone(),
            int_vpn0: spec.interface_vpn0.clone(),
            int_mgmt: spec.interface_mgmt.clone(),
            mgmt_ip: spec.mgmt_ip.clone(),
            vpn0_ip,
            vpn0_cidr,
            sys_ip: spec.sys_ip.clone(),
            default_route_vpn0: spec.default_route_vpn0.clone(),
            site_id,
            vm_model,
            add_routes: spec.add_routes.clone(),
            reg_chassis: String::new(),
            reg_token: String::new(),
            init_config: String::new(),
        })
    }
}

impl fmt::Display for Vedge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.dv_type, self.name)?;
        writeln!(f, "  int_vpn0: {}", self.int_vpn0)?;
        writeln!(f, "  int_mgmt: {}", self.int_mgmt)?;
        writeln!(f, "  mgmt_ip: {}", self.mgmt_ip)?;
        writeln!(f, "  vpn0_ip: {}", self.vpn0_cidr)?;
        writeln!(f, "  sys_ip: {}", self.sys_ip)?;
        writeln!(f, "  site_id: {} model: {}", self.site_id, self.vm_model)?;
        write!(f, "  default_route_vpn0: {}", self.default_route_vpn0)
    }
}

// --- Feature templates ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    VpnCfg,
    VpnInterfaces,
    Aaa,
}

impl TemplateScope {
    /// Template that renders the feature JSON for this scope
    pub fn template_name(&self) -> &'static str {
        match self {
            Self::VpnCfg => "sdwan_feature_vpn",
            Self::VpnInterfaces => "sdwan_feature_interfaces",
            Self::Aaa => "sdwan_feature_aaa",
        }
    }
}

/// The key being present is what counts, whatever its value
fn key_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(true)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnRoute {
    pub prefix: String,
    pub prefix_var_name: String,
    pub next_hop_var_name: String,
    pub distance_val: u32,
    pub distance_var_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVpn {
    pub vpn_id: u32,
    pub vpn_name: String,
    #[serde(default, deserialize_with = "key_present")]
    pub omp: bool,
    #[serde(default)]
    pub routes: Vec<VpnRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInterface {
    pub name: String,
    pub if_var_name: String,
    pub if_desc_var_name: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub ip_addr_var_name: String,
    #[serde(default)]
    pub dhcp: bool,
}

/// Feature template to import into vManage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViptelaTemplate {
    pub t_type: String,
    pub name: String,
    pub t_scope: TemplateScope,
    #[serde(default)]
    pub description: String,
    pub device_type: String,
    #[serde(default)]
    pub template_vpn: Option<TemplateVpn>,
    #[serde(default)]
    pub template_interface: Option<TemplateInterface>,
}

impl ViptelaTemplate {
    /// Scope-specific sections must be present
    pub fn validate(&self) -> Result<()> {
        match self.t_scope {
            TemplateScope::VpnCfg if self.template_vpn.is_none() => {
                Err(anyhow!("Template {}: scope vpn_cfg needs template_vpn", self.name))
            }
            TemplateScope::VpnInterfaces if self.template_interface.is_none() => {
                Err(anyhow!("Template {}: scope vpn_interfaces needs template_interface", self.name))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ViptelaTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Type: {}", self.t_type)?;
        writeln!(f, "  name: {}", self.name)?;
        writeln!(f, "  descr: {}", self.description)?;
        write!(f, "  dv_type: {}", self.device_type)?;
        if let Some(vpn) = &self.template_vpn {
            write!(f, "\n  vpn_id: {}\n  vpn_name: {}\n  routes: {}", vpn.vpn_id, vpn.vpn_name, vpn.routes.len())?;
        }
        if let Some(intf) = &self.template_interface {
            write!(f, "\n  interface: {}", intf.name)?;
        }
        Ok(())
    }
}

// --- vManage API ---

/// Unused bootstrap licence of one device model
#[derive(Debug, Clone, PartialEq)]
pub struct FreeLicence {
    pub uuid: String,
    pub serial_number: String,
}

/// Entry of /dataservice/system/device/{kind}
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDevice {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub vedge_certificate_state: String,
    #[serde(default)]
    pub serial_number: String,
}

/// `{ "data": [...] }` wrapper used by most dataservice endpoints
#[derive(Debug, Deserialize)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerAdd<'a> {
    #[serde(rename = "deviceIP")]
    pub device_ip: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub personality: &'a str,
    #[serde(rename = "generateCSR")]
    pub generate_csr: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_vpn0() {
        assert_eq!(split_vpn0("10.10.0.2/30").unwrap(), ("10.10.0.2".into(), "10.10.0.2/30".into()));
        assert_eq!(split_vpn0("10.10.0.2").unwrap(), ("10.10.0.2".into(), "10.10.0.2/24".into()));
        assert!(split_vpn0("vpn0").is_err());
    }

    #[test]
    fn test_template_omp_key_presence() {
        let t: ViptelaTemplate = serde_yaml::from_str(
            "
t_type: vpn-vedge
name: vpn0
t_scope: vpn_cfg
description: transport
device_type: vedge-cloud
template_vpn:
  vpn_id: 0
  vpn_name: transport
  omp:
",
        )
        .unwrap();
        let vpn = t.template_vpn.as_ref().unwrap();
        assert!(vpn.omp);
        assert!(vpn.routes.is_empty());
        t.validate().unwrap();

        let t: ViptelaTemplate = serde_yaml::from_str(
            "{t_type: x, name: lan, t_scope: vpn_cfg, device_type: vedge-cloud, template_vpn: {vpn_id: 10, vpn_name: lan}}",
        )
        .unwrap();
        assert!(!t.template_vpn.unwrap().omp);
    }

    #[test]
    fn test_template_scope_needs_section() {
        let t: ViptelaTemplate =
            serde_yaml::from_str("{t_type: x, name: ge0, t_scope: vpn_interfaces, device_type: vedge-cloud}").unwrap();
        assert!(t.validate().is_err());
        assert_eq!(t.t_scope.template_name(), "sdwan_feature_interfaces");
    }

    #[test]
    fn test_vedge_requires_model() {
        let spec: DeviceSpec = serde_yaml::from_str(
            "{vm_name: vedge1, interface_vpn0: ge0/0, interface_mgmt: eth0, mgmt_ip: 10.0.0.31, vpn0_ip: 10.10.1.2, sys_ip: 1.1.1.31, site_id: 31}",
        )
        .unwrap();
        assert!(Vedge::from_spec(DeviceKind::Vedge, "vedge1", &spec).is_err());
    }
}
