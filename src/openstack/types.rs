use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Keystone ---

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: TokenBody,
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    #[serde(default)]
    pub catalog: Vec<CatalogService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogService {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    pub url: String,
    #[serde(default)]
    pub region: Option<String>,
}

// --- Nova ---

#[derive(Debug, Deserialize)]
pub struct FlavorList {
    pub flavors: Vec<OsFlavor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsFlavor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub ram: u64,
    #[serde(default)]
    pub disk: u64,
}

#[derive(Debug, Deserialize)]
pub struct ServerList {
    pub servers: Vec<OsServer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsServerFlavor {
    #[serde(default)]
    pub original_name: String,
}

/// Nova reports `"image": ""` for volume-booted servers
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OsServerImage {
    Ref { id: String },
    Empty(String),
}

impl OsServerImage {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Ref { id } => Some(id),
            Self::Empty(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsAddress {
    pub addr: String,
    pub version: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsServer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub flavor: OsServerFlavor,
    #[serde(rename = "OS-EXT-STS:vm_state", default)]
    pub vm_state: String,
    #[serde(rename = "OS-EXT-SRV-ATTR:hypervisor_hostname", default)]
    pub hypervisor_hostname: Option<String>,
    #[serde(rename = "OS-EXT-SRV-ATTR:hostname", default)]
    pub hostname: Option<String>,
    #[serde(rename = "OS-EXT-SRV-ATTR:instance_name", default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub addresses: IndexMap<String, Vec<OsAddress>>,
    pub image: Option<OsServerImage>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ComputeImageList {
    pub images: Vec<OsComputeImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsComputeImage {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataResponse {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// --- Glance ---

#[derive(Debug, Deserialize)]
pub struct ImageList {
    pub images: Vec<OsImage>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsImage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub container_format: Option<String>,
    #[serde(default)]
    pub disk_format: Option<String>,
}

// --- Neutron ---

#[derive(Debug, Deserialize)]
pub struct FloatingIpList {
    pub floatingips: Vec<OsFloatingIp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsPortDetails {
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsFloatingIp {
    pub floating_ip_address: String,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
    #[serde(default)]
    pub port_details: Option<OsPortDetails>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkList {
    pub networks: Vec<OsNetwork>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsNetwork {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admin_state_up: bool,
    #[serde(default)]
    pub port_security_enabled: Option<bool>,
    #[serde(rename = "provider:network_type", default)]
    pub provider_network_type: Option<String>,
    #[serde(rename = "provider:physical_network", default)]
    pub provider_physical_network: Option<String>,
}

// --- Heat ---

#[derive(Debug, Deserialize)]
pub struct StackResponse {
    pub stack: OsStack,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsStack {
    pub id: String,
    #[serde(default)]
    pub stack_name: String,
    #[serde(default)]
    pub stack_status: String,
}

#[derive(Debug, Serialize)]
pub struct StackCreate<'a> {
    pub stack_name: &'a str,
    pub template: &'a str,
    pub disable_rollback: bool,
    pub timeout_mins: u64,
}
