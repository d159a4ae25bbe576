use anyhow::Result;
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::client::OpenStackClient;

// --- Flavors ---

#[derive(Debug, Clone, Serialize)]
pub struct FlavorInfo {
    pub name: String,
    pub flavor_id: String,
    pub vcpus: u32,
    pub ram: u64,
    pub disk: u64,
}

impl fmt::Display for FlavorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:5} {:20} {:4} {:7} {:4}", self.flavor_id, self.name, self.vcpus, self.ram, self.disk)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Flavors {
    pub flavors: IndexMap<String, FlavorInfo>,
}

impl Flavors {
    pub async fn load(cloud: &OpenStackClient) -> Result<Self> {
        let mut flavors = IndexMap::new();
        for flv in cloud.list_flavors().await? {
            flavors.insert(
                flv.name.clone(),
                FlavorInfo {
                    name: flv.name,
                    flavor_id: flv.id,
                    vcpus: flv.vcpus,
                    ram: flv.ram,
                    disk: flv.disk,
                },
            );
        }
        Ok(Self { flavors })
    }
}

impl fmt::Display for Flavors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:*^5} {:*^20} {:*^4} {:*^7} {:*^4}", "ID", "NAME", "VCPU", "RAM", "DISK")?;
        for flavor in self.flavors.values() {
            writeln!(f, "{}", flavor)?;
        }
        Ok(())
    }
}

// --- Images ---

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub name: String,
    pub image_id: String,
    /// MiB
    pub size: f64,
    pub container_format: String,
    pub disk_format: String,
    pub metadata: BTreeMap<String, String>,
}

impl fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " {:30}{:38}{:8.0}M {:5} {:5} {:?}",
            self.name, self.image_id, self.size, self.container_format, self.disk_format, self.metadata
        )
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Images {
    pub images: IndexMap<String, ImageInfo>,
}

impl Images {
    /// Glance images, with the Nova view of their metadata merged in by name
    pub async fn load(cloud: &OpenStackClient) -> Result<Self> {
        let mut images = IndexMap::new();
        for img in cloud.list_images().await? {
            let name = img.name.clone().unwrap_or_else(|| img.id.clone());
            images.insert(
                name.clone(),
                ImageInfo {
                    name,
                    image_id: img.id,
                    size: img.size.unwrap_or(0) as f64 / 1_048_576.0,
                    container_format: img.container_format.unwrap_or_default(),
                    disk_format: img.disk_format.unwrap_or_default(),
                    metadata: BTreeMap::new(),
                },
            );
        }
        let mut result = Self { images };
        result.merge_metadata(cloud.list_compute_images().await?.into_iter().map(|i| (i.name, i.metadata)));
        Ok(result)
    }

    fn merge_metadata(&mut self, compute: impl Iterator<Item = (String, HashMap<String, String>)>) {
        for (name, metadata) in compute {
            match self.images.get_mut(&name) {
                Some(img) => img.metadata = metadata.into_iter().collect(),
                None => tracing::debug!("Compute image {} not in glance", name),
            }
        }
    }
}

impl fmt::Display for Images {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:*^30} {:*^38} {:*^8} {:*^7} {:*^7}", "NAME", "ID", "SIZE", "CONT.FORMAT", "METADATA")?;
        for img in self.images.values() {
            writeln!(f, "{}", img)?;
        }
        Ok(())
    }
}

// --- Networks ---

#[derive(Debug, Clone, Serialize)]
pub struct NetInfo {
    pub name: String,
    pub net_id: String,
    pub admin_state: bool,
    pub security: Option<bool>,
    pub provider_type: Option<String>,
    pub phys_net: Option<String>,
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "None".to_string(), |v| v.to_string())
}

impl fmt::Display for NetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:10} {:38} {:5} {:5}  {:10} {}",
            self.name,
            self.net_id,
            self.admin_state,
            opt(&self.security),
            opt(&self.provider_type),
            opt(&self.phys_net)
        )
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Networks {
    /// Sorted by network name
    pub nets: BTreeMap<String, NetInfo>,
}

impl Networks {
    pub async fn load(cloud: &OpenStackClient) -> Result<Self> {
        let nets = cloud
            .list_networks()
            .await?
            .into_iter()
            .map(|net| {
                (
                    net.name.clone(),
                    NetInfo {
                        name: net.name,
                        net_id: net.id,
                        admin_state: net.admin_state_up,
                        security: net.port_security_enabled,
                        provider_type: net.provider_network_type,
                        phys_net: net.provider_physical_network,
                    },
                )
            })
            .collect();
        Ok(Self { nets })
    }
}

impl fmt::Display for Networks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:*^10} {:*^38} {:*^5}{:*^5} {:*^10} {:*^10}",
            "NAME", "ID", "ADST", "SEC", "PROV_TYPE", "PHYS_NET"
        )?;
        for net in self.nets.values() {
            writeln!(f, "{}", net)?;
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

    #[test]
    fn test_flavor_table_header() {
        let mut flavors = Flavors::default();
        flavors.flavors.insert(
            "m1.small".into(),
            FlavorInfo { name: "m1.small".into(), flavor_id: "2".into(), vcpus: 1, ram: 2048, disk: 20 },
        );
        let out = flavors.to_string();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("*ID** ********NAME******** VCPU **RAM** DISK"));
        assert_eq!(lines.next(), Some("2     m1.small                1    2048   20"));
    }

    #[test]
    fn test_merge_metadata_by_name() {
        let mut images = Images::default();
        images.images.insert(
            "vmanage".into(),
            ImageInfo {
                name: "vmanage".into(),
                image_id: "i1".into(),
                size: 1.0,
                container_format: "bare".into(),
                disk_format: "qcow2".into(),
                metadata: BTreeMap::new(),
            },
        );
        let meta: HashMap<String, String> = [("ssh_user".to_string(), "admin".to_string())].into_iter().collect();
        images.merge_metadata(vec![("vmanage".to_string(), meta), ("ghost".to_string(), HashMap::new())].into_iter());
        assert_eq!(images.images["vmanage"].metadata["ssh_user"], "admin");
        assert_eq!(images.images.len(), 1);
    }

    #[tokio::test]
    async fn test_load_images_and_networks() {
        let server = MockServer::start().await;
        mount_keystone(&server).await;
        Mock::given(method("GET"))
            .and(path("/image/v2/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": [{ "id": "i1", "name": "csr1000v", "size": 2097152, "container_format": "bare", "disk_format": "qcow2" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/compute/v2.1/images/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": [{ "id": "i1", "name": "csr1000v", "metadata": { "net_os": "ios" } }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/network/v2.0/networks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "networks": [
                    { "id": "n2", "name": "wan0", "admin_state_up": true, "provider:network_type": "vxlan" },
                    { "id": "n1", "name": "lan1", "admin_state_up": false, "port_security_enabled": false },
                ]
            })))
            .mount(&server)
            .await;

        let cloud = OpenStackClient::connect(&cloud_for(&server)).await.unwrap();
        let images = Images::load(&cloud).await.unwrap();
        let img = &images.images["csr1000v"];
        assert_eq!(img.size, 2.0);
        assert_eq!(img.metadata["net_os"], "ios");

        let nets = Networks::load(&cloud).await.unwrap();
        let names: Vec<&String> = nets.nets.keys().collect();
        assert_eq!(names, vec!["lan1", "wan0"]);
        assert!(nets.to_string().contains("wan0       n2"));
    }
}
