use anyhow::Result;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::client::OpenStackClient;
use super::types::OsServer;
use crate::kvm::KvmInstanceInfo;

/// Addresses of a server on one network
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetAddrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub server_id: String,
    pub flavor: String,
    pub status: String,
    pub host: String,
    pub hostname: String,
    pub instance: String,
    pub time_created: String,
    /// Network name to addresses, in the order Nova reports them
    pub nets: IndexMap<String, NetAddrs>,
    pub float_ip: String,
    pub fixed_ip_address: String,
    pub image_name: String,
    pub mgmt_name: String,
    pub mgmt_ip: String,
    pub srv_group: String,
    pub ansible_name: String,
    pub name_intrf: String,
    pub platform: String,
    pub img_metadata: HashMap<String, String>,
    pub srv_metadata: HashMap<String, String>,
    pub uri_qemu: String,
    pub kvminfo: Option<KvmInstanceInfo>,
}

/// "2024-03-01T10:22:05Z" -> "01 Mar 2024 10:22"
pub fn format_created(created: &str) -> String {
    match NaiveDateTime::parse_from_str(created, "%Y-%m-%dT%H:%M:%SZ") {
        Ok(ts) => ts.format("%d %b %Y %H:%M").to_string(),
        Err(_) => created.to_string(),
    }
}

impl ServerInfo {
    pub fn from_api(srv: OsServer, image_name: String, img_metadata: HashMap<String, String>) -> Self {
        let mut nets = IndexMap::new();
        for (net_name, addrs) in &srv.addresses {
            let entry: &mut NetAddrs = nets.entry(net_name.clone()).or_default();
            for addr in addrs {
                match addr.version {
                    4 => entry.ipv4 = Some(addr.addr.clone()),
                    6 => entry.ipv6 = Some(addr.addr.clone()),
                    _ => {}
                }
            }
        }
        let (mgmt_name, mgmt_ip) = nets
            .first()
            .map(|(name, addrs)| (name.clone(), addrs.ipv4.clone().unwrap_or_default()))
            .unwrap_or_default();

        let host = srv.hypervisor_hostname.unwrap_or_default();
        let meta = |key: &str| srv.metadata.get(key).cloned().unwrap_or_default();
        let srv_group = meta("group");
        let ansible_name = meta("ansible_name");
        let name_intrf = meta("name_intrf");
        let platform = meta("platform");

        Self {
            uri_qemu: format!("qemu+ssh://root@{}/system?socket=/var/run/libvirt/libvirt-sock", host),
            name: srv.name,
            server_id: srv.id,
            flavor: srv.flavor.original_name,
            status: srv.vm_state,
            host,
            hostname: srv.hostname.unwrap_or_default(),
            instance: srv.instance_name.unwrap_or_default(),
            time_created: format_created(&srv.created),
            nets,
            float_ip: String::new(),
            fixed_ip_address: String::new(),
            image_name,
            mgmt_name,
            mgmt_ip,
            srv_group,
            ansible_name,
            name_intrf,
            platform,
            img_metadata,
            srv_metadata: srv.metadata,
            kvminfo: None,
        }
    }

    /// IPv4 address on the named network
    pub fn ipv4_on(&self, net_name: &str) -> Option<&str> {
        self.nets.get(net_name).and_then(|n| n.ipv4.as_deref())
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nets = self
            .nets
            .iter()
            .map(|(name, addrs)| format!("{}={}", name, addrs.ipv4.as_deref().unwrap_or("-")))
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "Name: {:10} Flavor: {:15}Stat: {:3} Host: {:4} Instance: {:15} HName: {:10}Net: {} Float_ip: {} Ips: {}",
            self.name, self.flavor, self.status, self.host, self.instance, self.hostname, nets, self.float_ip,
            self.fixed_ip_address
        )
    }
}

/// Active servers of one stack
#[derive(Debug, Default, Serialize)]
pub struct Servers {
    pub servers: Vec<ServerInfo>,
}

impl Servers {
    /// Query active servers named `<stack>_*` (or `<stack>*` without the underline).
    /// With `with_kvm` the libvirt domain of every server is read from its hypervisor.
    pub async fn load(
        cloud: &OpenStackClient,
        stack: &str,
        name_underline: bool,
        with_kvm: bool,
        virsh: &str,
    ) -> Result<Self> {
        let prefix = if name_underline && !stack.is_empty() {
            format!("{}_", stack)
        } else {
            stack.to_string()
        };

        let mut servers = Vec::new();
        for srv in cloud.list_servers(Some(&prefix)).await? {
            if !srv.name.starts_with(&prefix) {
                continue;
            }
            if srv.vm_state != "active" {
                tracing::warn!("Skipping {}: state {}", srv.name, srv.vm_state);
                continue;
            }

            let image_id = srv.image.as_ref().and_then(|i| i.id()).map(str::to_string);
            let (image_name, img_metadata) = match image_id {
                Some(id) => {
                    let name = cloud.get_image(&id).await?.and_then(|img| img.name).unwrap_or_default();
                    (name, cloud.get_image_metadata(&id).await?)
                }
                None => (String::new(), HashMap::new()),
            };

            let mut info = ServerInfo::from_api(srv, image_name, img_metadata);
            tracing::debug!("URI: {}", info.uri_qemu);
            if with_kvm {
                match KvmInstanceInfo::fetch(&info.uri_qemu, &info.instance, virsh).await {
                    Ok(kvm) => info.kvminfo = Some(kvm),
                    Err(e) => tracing::warn!("KVM info for {} unavailable: {}", info.name, e),
                }
            }
            servers.push(info);
        }
        tracing::debug!("Total found servers: {}", servers.len());

        let mut result = Self { servers };
        result.attach_floating_ips(cloud).await?;
        tracing::info!("Stack: {} Total servers: {}", stack, result.servers.len());
        Ok(result)
    }

    async fn attach_floating_ips(&mut self, cloud: &OpenStackClient) -> Result<()> {
        for fip in cloud.list_floating_ips().await? {
            let Some(port) = fip.port_details else { continue };
            tracing::debug!("Port: {}", port.device_id);
            if let Some(srv) = self.servers.iter_mut().find(|s| s.server_id == port.device_id) {
                srv.float_ip = fip.floating_ip_address;
                srv.fixed_ip_address = fip.fixed_ip_address.unwrap_or_default();
            }
        }
        Ok(())
    }
}

impl fmt::Display for Servers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for srv in &self.servers {
            writeln!(f, "{}", srv)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::tests::{cloud_for, mount_keystone};
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn os_server(value: serde_json::Value) -> OsServer {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_format_created() {
        assert_eq!(format_created("2024-03-01T10:22:05Z"), "01 Mar 2024 10:22");
        assert_eq!(format_created("yesterday"), "yesterday");
    }

    #[test]
    fn test_from_api_mgmt_is_first_net() {
        let srv = os_server(json!({
            "id": "s1",
            "name": "lab1_R1",
            "flavor": { "original_name": "m1.router" },
            "OS-EXT-STS:vm_state": "active",
            "OS-EXT-SRV-ATTR:hypervisor_hostname": "osc1",
            "OS-EXT-SRV-ATTR:instance_name": "instance-0001",
            "created": "2024-03-01T10:22:05Z",
            "addresses": {
                "wan0": [{ "addr": "10.0.0.11", "version": 4 }, { "addr": "fd00::11", "version": 6 }],
                "lan1": [{ "addr": "192.168.1.1", "version": 4 }]
            },
            "image": { "id": "img1" },
            "metadata": { "group": "routers", "ansible_name": "R1", "platform": "ios" }
        }));
        let info = ServerInfo::from_api(srv, "csr1000v".into(), HashMap::new());
        assert_eq!(info.mgmt_name, "wan0");
        assert_eq!(info.mgmt_ip, "10.0.0.11");
        assert_eq!(info.nets["wan0"].ipv6.as_deref(), Some("fd00::11"));
        assert_eq!(info.ipv4_on("lan1"), Some("192.168.1.1"));
        assert_eq!(info.srv_group, "routers");
        assert_eq!(info.name_intrf, "");
        assert_eq!(info.uri_qemu, "qemu+ssh://root@osc1/system?socket=/var/run/libvirt/libvirt-sock");
        assert_eq!(info.time_created, "01 Mar 2024 10:22");
    }

    #[tokio::test]
    async fn test_load_filters_and_attaches_floating_ips() {
        let server = MockServer::start().await;
        mount_keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/servers/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "servers": [
                    { "id": "s1", "name": "lab1_R1", "OS-EXT-STS:vm_state": "active", "image": { "id": "img1" },
                      "addresses": { "wan0": [{ "addr": "10.0.0.11", "version": 4 }] } },
                    { "id": "s2", "name": "lab1_R2", "OS-EXT-STS:vm_state": "stopped", "image": { "id": "img1" } },
                    { "id": "s3", "name": "other_lab1_R3", "OS-EXT-STS:vm_state": "active", "image": "" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/image/v2/images/img1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "img1", "name": "csr1000v" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/images/img1/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "metadata": { "ssh_user": "cisco" } })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/network/v2.0/floatingips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "floatingips": [
                    { "floating_ip_address": "203.0.113.5", "fixed_ip_address": "10.0.0.11", "port_details": { "device_id": "s1" } },
                    { "floating_ip_address": "203.0.113.6", "port_details": null }
                ]
            })))
            .mount(&server)
            .await;

        let cloud = OpenStackClient::connect(&cloud_for(&server)).await.unwrap();
        let servers = Servers::load(&cloud, "lab1", true, false, "virsh").await.unwrap();
        assert_eq!(servers.servers.len(), 1);
        let r1 = &servers.servers[0];
        assert_eq!(r1.image_name, "csr1000v");
        assert_eq!(r1.img_metadata["ssh_user"], "cisco");
        assert_eq!(r1.float_ip, "203.0.113.5");
        assert_eq!(r1.fixed_ip_address, "10.0.0.11");
        assert!(servers.to_string().contains("Name: lab1_R1"));
    }
}
