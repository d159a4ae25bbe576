use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tera::Context as TeraContext;
use tokio::process::Command;

use crate::templates::TemplateEngine;
use crate::utils::{name_digits, nth_host};

pub const STACK_DIR: &str = "net-stack";
pub const MAP_DIR: &str = "net-maps";

// --- Lab file ---

/// Network key, written as a number or a name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum LinkId {
    Num(u64),
    Name(String),
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{}", n),
            Self::Name(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ImageSpec {
    flavor: String,
    image: String,
    #[serde(default)]
    init_img: Option<String>,
    #[serde(default)]
    name_intrf: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NetSpec {
    #[serde(default)]
    ipv4: String,
    #[serde(default)]
    ipv6: String,
    #[serde(default)]
    dhcp_srv: bool,
    #[serde(default)]
    connected_link: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CloudInit {
    #[serde(default)]
    cloud_config: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DeviceSpec {
    #[serde(rename = "type")]
    dev_type: String,
    #[serde(default)]
    links: Vec<LinkId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    group: String,
    #[serde(default)]
    os_host: String,
    #[serde(default)]
    mgmt_ipv4: String,
    #[serde(default)]
    mgmt_ipv6: String,
    #[serde(default)]
    cloud_init: Option<CloudInit>,
}

#[derive(Debug, Deserialize)]
struct LabFile {
    vm: IndexMap<String, IndexMap<String, ImageSpec>>,
    #[serde(default)]
    networks: IndexMap<LinkId, Option<NetSpec>>,
    #[serde(default)]
    routers: IndexMap<String, DeviceSpec>,
    #[serde(default)]
    servers: IndexMap<String, DeviceSpec>,
}

// --- Resolved lab ---

#[derive(Debug, Clone, Serialize)]
pub struct AttachedDevice {
    pub name: String,
    pub dev_name: String,
    pub intr: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabLink {
    pub num: String,
    pub name: String,
    pub ipv4: String,
    pub ipv6: String,
    pub dhcp_srv: bool,
    pub connected_link: String,
    pub all_dvs: Vec<AttachedDevice>,
}

impl fmt::Display for LabLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dvs = self.all_dvs.iter().map(|d| d.dev_name.as_str()).collect::<Vec<_>>().join(",");
        write!(
            f,
            "{:5} {:10} {:20} {:20} dhcp:{} conn_link:{} AllDvs: {}",
            self.num, self.name, self.ipv4, self.ipv6, self.dhcp_srv, self.connected_link, dvs
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabImage {
    pub name: String,
    pub dev_type: String,
    pub flavor: String,
    pub image: String,
    pub init_img: String,
    pub name_intrf: String,
    pub platform: String,
}

impl fmt::Display for LabImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:10} {:20} {:20} {:20} {:20}",
            self.name, self.dev_type, self.flavor, self.image, self.init_img
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabRole {
    Router,
    Server,
}

impl LabRole {
    /// Host index offsets of the first address on a link, IPv4 then IPv6
    fn offsets(&self) -> (u128, u128) {
        match self {
            Self::Router => (100, 256),
            Self::Server => (180, 512),
        }
    }
}

/// One port of a device on a lab network
#[derive(Debug, Clone, Serialize)]
pub struct DeviceLink {
    pub num: String,
    pub name: String,
    pub count: u32,
    pub connected_link: String,
    pub ipv4: String,
    pub ipv4_addr: String,
    pub ipv6: String,
    pub ipv6_addr: String,
}

/// Router or server of the lab
#[derive(Debug, Clone, Serialize)]
pub struct LabDevice {
    pub role: LabRole,
    pub name: String,
    pub dev_name: String,
    pub group: String,
    pub os_host: String,
    pub mgmt_ipv4: String,
    pub mgmt_ipv6: String,
    pub image: LabImage,
    pub links: Vec<DeviceLink>,
    pub cloud_config: Vec<String>,
}

/// Address `offset + <digits of name>` inside `cidr`
fn host_addr(cidr: &str, index: u128) -> Result<String> {
    let net: IpNetwork = cidr
        .parse()
        .map_err(|e| anyhow!("Invalid network '{}': {}", cidr, e))?;
    nth_host(&net, index)
        .map(|ip| ip.to_string())
        .ok_or_else(|| anyhow!("Host index {} is outside {}", index, cidr))
}

/// Everything a lab file describes, with addresses assigned
#[derive(Debug, Clone, Serialize)]
pub struct DevicesInfo {
    pub name: String,
    #[serde(skip)]
    pub file: PathBuf,
    pub images: IndexMap<String, LabImage>,
    pub links: IndexMap<String, LabLink>,
    pub devices: IndexMap<String, LabDevice>,
}

impl DevicesInfo {
    pub fn load(file: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read lab file {}", file.display()))?;
        let mut info = Self::from_yaml(&text, &file.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default())?;
        info.file = file.to_path_buf();
        Ok(info)
    }

    pub fn from_yaml(text: &str, name: &str) -> Result<Self> {
        let lab: LabFile = serde_yaml::from_str(text).context("Invalid lab file")?;

        let mut images = IndexMap::new();
        for (dev_type, entries) in lab.vm {
            for (img_name, spec) in entries {
                images.insert(
                    img_name.clone(),
                    LabImage {
                        name: img_name,
                        dev_type: dev_type.clone(),
                        flavor: spec.flavor,
                        image: spec.image,
                        init_img: spec.init_img.unwrap_or_default(),
                        name_intrf: spec.name_intrf.unwrap_or_default(),
                        platform: spec.platform.unwrap_or_default(),
                    },
                );
            }
        }

        let mut links = IndexMap::new();
        for (id, spec) in lab.networks {
            let spec = spec.unwrap_or_default();
            let link = LabLink {
                num: id.to_string(),
                name: format!("link_{}", id),
                ipv4: spec.ipv4,
                ipv6: spec.ipv6,
                dhcp_srv: spec.dhcp_srv,
                connected_link: spec.connected_link,
                all_dvs: Vec::new(),
            };
            tracing::debug!("LinkInfo: {}", link);
            links.insert(id.to_string(), link);
        }

        let mut info = Self {
            name: name.to_string(),
            file: PathBuf::new(),
            images,
            links,
            devices: IndexMap::new(),
        };
        for (dev, spec) in &lab.routers {
            info.add_device(LabRole::Router, dev, spec)?;
        }
        for (dev, spec) in &lab.servers {
            info.add_device(LabRole::Server, dev, spec)?;
        }
        tracing::debug!("{}", info);
        Ok(info)
    }

    fn add_device(&mut self, role: LabRole, name: &str, spec: &DeviceSpec) -> Result<()> {
        if self.devices.contains_key(name) {
            bail!("Device {} is defined twice", name);
        }
        let image = self
            .images
            .get(&spec.dev_type)
            .cloned()
            .ok_or_else(|| anyhow!("{}: unknown vm type {}", name, spec.dev_type))?;
        let dev_name = spec.name.clone().unwrap_or_else(|| name.to_string());
        let (off4, off6) = role.offsets();
        let id = name_digits(name);

        let mut dev_links = Vec::new();
        for (idx, link_id) in spec.links.iter().enumerate() {
            let count = idx as u32 + 1;
            let key = link_id.to_string();
            let link = self
                .links
                .get_mut(&key)
                .ok_or_else(|| anyhow!("{}: unknown network {}", name, key))?;
            link.all_dvs.push(AttachedDevice {
                name: name.to_string(),
                dev_name: dev_name.clone(),
                intr: count,
            });

            let ipv4_addr = if link.ipv4.is_empty() {
                String::new()
            } else {
                host_addr(&link.ipv4, off4 + id)?
            };
            let ipv6_addr = if link.ipv6.is_empty() {
                String::new()
            } else {
                host_addr(&link.ipv6, off6 + id)?
            };
            dev_links.push(DeviceLink {
                num: key,
                name: link.name.clone(),
                count,
                connected_link: link.connected_link.clone(),
                ipv4: link.ipv4.clone(),
                ipv4_addr,
                ipv6: link.ipv6.clone(),
                ipv6_addr,
            });
        }

        let cloud_config = spec
            .cloud_init
            .as_ref()
            .filter(|c| !c.cloud_config.is_empty())
            .map(|c| c.cloud_config.lines().map(str::to_string).collect())
            .unwrap_or_default();

        self.devices.insert(
            name.to_string(),
            LabDevice {
                role,
                name: name.to_string(),
                dev_name,
                group: spec.group.clone(),
                os_host: spec.os_host.clone(),
                mgmt_ipv4: spec.mgmt_ipv4.clone(),
                mgmt_ipv6: spec.mgmt_ipv6.clone(),
                image,
                links: dev_links,
                cloud_config,
            },
        );
        Ok(())
    }
}

impl fmt::Display for DevicesInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:*^10} {:*^20} {:*^20} {:*^20} {:*^20}", "NAME", "TYPE", "FLAVOR", "IMG", "INIT_IMG")?;
        for image in self.images.values() {
            writeln!(f, "{}", image)?;
        }
        writeln!(f)?;
        for link in self.links.values() {
            writeln!(f, "{}", link)?;
        }
        Ok(())
    }
}

fn quote(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\\\""))
}

/// Heat stack and network map generator for one lab
pub struct YamlToHeat {
    pub dvsinfo: DevicesInfo,
    pub net_mgmt: String,
    pub avail_zone: String,
    pub out_dir: PathBuf,
}

impl YamlToHeat {
    pub fn new(dvsinfo: DevicesInfo, out_dir: &Path) -> Self {
        Self {
            dvsinfo,
            net_mgmt: "wan0".to_string(),
            avail_zone: "nova:osc".to_string(),
            out_dir: out_dir.to_path_buf(),
        }
    }

    pub fn heat_file(&self) -> PathBuf {
        let file_name = self
            .dvsinfo
            .file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.yaml", self.dvsinfo.name));
        self.out_dir.join(STACK_DIR).join(format!("st_{}", file_name))
    }

    /// Network map file with the given extension
    pub fn map_file(&self, ext: &str) -> PathBuf {
        self.out_dir.join(MAP_DIR).join(format!("st_{}.{}", self.dvsinfo.name, ext))
    }

    pub fn render_stack(&self, engine: &TemplateEngine) -> Result<String> {
        let mut context = TeraContext::new();
        context.insert("dvsinfo", &self.dvsinfo);
        context.insert("net_mgmt", &self.net_mgmt);
        context.insert("avail_zone", &self.avail_zone);
        engine.render("heat_stack", &context)
    }

    /// Graphviz source: devices linked to an octagon per network
    pub fn network_map(&self) -> String {
        let mut out = String::from("graph \"Network Map\" {\n");
        out.push_str("\tgraph [fillcolor=red fontsize=30 labelfontsize=5]\n");
        out.push_str(
            "\tnode [color=lightgrey fixedsize=true fontsize=10 len=3.0 overlap=false shape=doublecircle size=20 style=filled]\n",
        );
        for link in self.dvsinfo.links.values() {
            let net = if link.ipv4.is_empty() { &link.name } else { &link.ipv4 };
            for dv in &link.all_dvs {
                out.push_str(&format!(
                    "\t{} -- {} [label={} fontsize=10 len=2.0 width=2.5]\n",
                    quote(&dv.dev_name),
                    quote(net),
                    dv.intr
                ));
                out.push_str(&format!("\t{} [fontsize=9 shape=octagon style=rounded width=2.0]\n", quote(net)));
            }
        }
        out.push_str("}\n");
        out
    }

    /// Write the Heat template and the map source, then try to draw the map as PDF
    pub async fn generate(&self, engine: &TemplateEngine, neato: &str) -> Result<(PathBuf, PathBuf)> {
        let heat_file = self.heat_file();
        for dir in [STACK_DIR, MAP_DIR] {
            let path = self.out_dir.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }

        tracing::info!("Generate stack file {}", heat_file.display());
        tokio::fs::write(&heat_file, self.render_stack(engine)?).await?;

        let gv_file = self.map_file("gv");
        tokio::fs::write(&gv_file, self.network_map()).await?;
        let pdf_file = self.map_file("pdf");
        match Command::new(neato)
            .arg("-Tpdf")
            .arg("-o")
            .arg(&pdf_file)
            .arg(&gv_file)
            .status()
            .await
        {
            Ok(status) if status.success() => tracing::info!("Network map {}", pdf_file.display()),
            Ok(status) => tracing::warn!("{} exited with {}, map left as {}", neato, status, gv_file.display()),
            Err(e) => tracing::warn!("{} unavailable ({}), map left as {}", neato, e, gv_file.display()),
        }
        Ok((heat_file, gv_file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAB: &str = "
vm:
  routers:
    csr:
      flavor: m1.router
      image: csr1000v-17
      name_intrf: GigabitEthernet
      platform: ios
  servers:
    ubuntu:
      flavor: m1.small
      image: ubuntu-22.04
networks:
  1:
    ipv4: 10.0.1.0/24
    ipv6: fd00:1::/64
    dhcp_srv: true
  2:
    ipv4: 10.0.2.0/24
  3:
routers:
  R1:
    type: csr
    group: routers
    links: [1, 2]
  R12:
    type: csr
    links: [2, 3]
    os_host: osc2
servers:
  SRV3:
    type: ubuntu
    links: [1]
    cloud_init:
      cloud_config: |
        #cloud-config
        password: lab
";

    #[test]
    fn test_addresses() {
        let info = DevicesInfo::from_yaml(LAB, "lab1").unwrap();
        let r1 = &info.devices["R1"];
        assert_eq!(r1.links[0].ipv4_addr, "10.0.1.101");
        assert_eq!(r1.links[0].ipv6_addr, "fd00:1::101");
        assert_eq!(r1.links[1].count, 2);
        assert_eq!(r1.links[1].ipv4_addr, "10.0.2.101");

        let r12 = &info.devices["R12"];
        assert_eq!(r12.links[0].ipv4_addr, "10.0.2.112");
        assert_eq!(r12.links[1].ipv4_addr, "");

        let srv = &info.devices["SRV3"];
        assert_eq!(srv.role, LabRole::Server);
        assert_eq!(srv.links[0].ipv4_addr, "10.0.1.183");
        assert_eq!(srv.links[0].ipv6_addr, "fd00:1::203");
        assert_eq!(srv.cloud_config, ["#cloud-config", "password: lab"]);

        let attached: Vec<&str> = info.links["2"].all_dvs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(attached, ["R1", "R12"]);
    }

    #[test]
    fn test_unknown_references() {
        let bad_type = LAB.replace("type: ubuntu", "type: debian");
        assert!(DevicesInfo::from_yaml(&bad_type, "lab1").is_err());
        let bad_link = LAB.replace("links: [1]", "links: [9]");
        assert!(DevicesInfo::from_yaml(&bad_link, "lab1").is_err());
    }

    #[test]
    fn test_address_outside_network() {
        let small = LAB.replace("10.0.2.0/24", "10.0.2.0/28");
        let err = DevicesInfo::from_yaml(&small, "lab1").unwrap_err();
        assert!(err.to_string().contains("outside 10.0.2.0/28"));
    }

    #[test]
    fn test_render_stack() {
        let heat = YamlToHeat::new(DevicesInfo::from_yaml(LAB, "lab1").unwrap(), Path::new("out"));
        let engine = TemplateEngine::new(None).unwrap();
        let out = heat.render_stack(&engine).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        let res = &parsed["resources"];

        assert_eq!(res["subnet_link_1"]["properties"]["enable_dhcp"], serde_yaml::Value::Bool(true));
        assert!(res["subnet_link_3"].is_null());
        assert_eq!(res["R1"]["properties"]["name"].as_str(), Some("lab1_R1"));
        assert_eq!(res["R1"]["properties"]["availability_zone"].as_str(), Some("nova:osc"));
        assert_eq!(res["R12"]["properties"]["availability_zone"].as_str(), Some("nova:osc2"));
        assert_eq!(
            res["port_R1_2"]["properties"]["fixed_ips"][0]["ip_address"].as_str(),
            Some("10.0.2.101")
        );
        assert_eq!(res["port_SRV3_mgmt"]["properties"]["network"].as_str(), Some("wan0"));
        assert_eq!(
            res["SRV3"]["properties"]["user_data"].as_str(),
            Some("#cloud-config\npassword: lab\n")
        );
        assert_eq!(heat.heat_file(), Path::new("out/net-stack/st_lab1.yaml"));
    }

    #[test]
    fn test_network_map() {
        let heat = YamlToHeat::new(DevicesInfo::from_yaml(LAB, "lab1").unwrap(), Path::new("out"));
        let map = heat.network_map();
        assert!(map.starts_with("graph \"Network Map\" {\n"));
        assert!(map.contains("\t\"R1\" -- \"10.0.1.0/24\" [label=1 "));
        assert!(map.contains("\t\"R12\" -- \"link_3\" [label=2 "));
        assert!(map.contains("\t\"SRV3\" -- \"10.0.1.0/24\" [label=1 "));
        assert!(map.ends_with("}\n"));
    }

    #[tokio::test]
    async fn test_generate_files() {
        let dir = tempfile::tempdir().unwrap();
        let lab = dir.path().join("lab1.yml");
        std::fs::write(&lab, LAB).unwrap();

        let heat = YamlToHeat::new(DevicesInfo::load(&lab).unwrap(), dir.path());
        let engine = TemplateEngine::new(None).unwrap();
        let (stack, gv) = heat.generate(&engine, "/nonexistent/neato").await.unwrap();
        assert_eq!(stack, dir.path().join("net-stack/st_lab1.yml"));
        assert_eq!(gv, dir.path().join("net-maps/st_lab1.gv"));
        assert!(std::fs::read_to_string(&stack).unwrap().starts_with("heat_template_version"));
        assert!(gv.exists());
    }
}
