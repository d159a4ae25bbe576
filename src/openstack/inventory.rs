use anyhow::{anyhow, Context, Result};
use regex_lite::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use super::servers::Servers;
use crate::templates::TemplateEngine;
use crate::utils::wait_for_connection;

const ADMIN_IMAGES: &str = r"bond|smart|vmanage|edge|cedge";

/// Connection facts of one server on the chosen network
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SrvNet {
    pub ipv4: String,
    pub user: String,
    pub group: String,
    pub net_os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_connection: Option<String>,
}

/// Nornir-style host entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabHost {
    pub ipv4: String,
    pub groups: Vec<String>,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_connection: Option<String>,
    pub connection_options: BTreeMap<String, Value>,
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow!("Bad pattern {}: {}", pattern, e))
}

/// Short inventory name: `R<n>`, else `SRV<n>`, else the second `_` field, else the name itself
pub fn nick_name(name: &str) -> Result<String> {
    let router = regex(r"[^R]*(R\d+)")?;
    let server = regex(r"(SRV\d+)")?;
    let nick = if let Some(c) = router.captures(name) {
        c[1].to_string()
    } else if name.contains("SRV") {
        server
            .captures(name)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| name.to_string())
    } else if let Some(field) = name.split('_').nth(1) {
        field.to_string()
    } else {
        name.to_string()
    };
    Ok(nick)
}

impl Servers {
    /// Servers keyed by name with their address on `net_name`.
    /// The ssh user is `root`, `admin` for SD-WAN style images, or the image `ssh_user` metadata.
    pub fn get_srv_nets(&self, net_name: &str) -> Result<BTreeMap<String, SrvNet>> {
        let admin_images = regex(ADMIN_IMAGES)?;
        let mut srv_ips = BTreeMap::new();
        tracing::info!("Total srvs: {}", self.servers.len());

        for srv in &self.servers {
            let Some(ipv4) = srv.ipv4_on(net_name) else {
                tracing::warn!("Server {} has no address on {}", srv.name, net_name);
                continue;
            };
            tracing::debug!("srv: {} net: {} ipv4: {}", srv.name, net_name, ipv4);

            let mut user = if admin_images.is_match(&srv.image_name) { "admin" } else { "root" }.to_string();
            if let Some(ssh_user) = srv.img_metadata.get("ssh_user") {
                user = ssh_user.clone();
            }
            srv_ips.insert(
                srv.name.clone(),
                SrvNet {
                    ipv4: ipv4.to_string(),
                    user,
                    group: srv.srv_group.clone(),
                    net_os: srv.img_metadata.get("net_os").cloned().unwrap_or_default(),
                    ansible_connection: srv.img_metadata.get("ansible_connection").cloned(),
                },
            );
        }
        Ok(srv_ips)
    }

    /// Lab hosts keyed by their `ansible_name` metadata
    pub fn get_srv_labs(&self, net_name: &str) -> BTreeMap<String, LabHost> {
        let mut hosts = BTreeMap::new();
        for srv in &self.servers {
            let Some(ipv4) = srv.ipv4_on(net_name) else {
                tracing::warn!("Server {} has no address on {}", srv.name, net_name);
                continue;
            };
            for (ind, (net, addrs)) in srv.nets.iter().enumerate() {
                tracing::debug!(
                    "Interface: {} {} net {}: {}",
                    srv.name_intrf,
                    ind + 1,
                    net,
                    addrs.ipv4.as_deref().unwrap_or("")
                );
            }
            hosts.insert(
                srv.ansible_name.clone(),
                LabHost {
                    ipv4: ipv4.to_string(),
                    groups: srv.srv_group.split(',').map(str::to_string).collect(),
                    platform: srv.platform.clone(),
                    ansible_connection: srv.img_metadata.get("ansible_connection").cloned(),
                    connection_options: BTreeMap::new(),
                },
            );
        }
        hosts
    }

    /// Render the static Ansible hosts file for `net_name` into `path`
    pub fn create_ansible_hosts(&self, engine: &TemplateEngine, net_name: &str, path: &Path) -> Result<()> {
        let srvs = self.get_srv_nets(net_name)?;
        let rendered = engine.render_with("ansible_hosts", "srvs", &srvs)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &rendered).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Ansible hosts written to {}", path.display());
        Ok(())
    }

    /// Ansible dynamic-inventory document for `net_name`
    pub fn create_dynamic_inventory(&self, net_name: &str) -> Result<Value> {
        let srvs = self.get_srv_nets(net_name)?;
        let mut inv = Map::new();
        let mut children: Vec<String> = Vec::new();
        let mut all_hosts: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut hostvars = Map::new();

        for srv in srvs.values().filter(|s| !s.group.is_empty()) {
            if !children.contains(&srv.group) {
                children.push(srv.group.clone());
            }
            groups.entry(srv.group.clone()).or_default();
        }

        for (name, srv) in &srvs {
            if srv.net_os == "win" {
                continue;
            }
            let nick = nick_name(name)?;
            tracing::info!("srv: {}, nick_srv: {}", name, nick);

            let mut vars = json!({
                "ansible_host": srv.ipv4,
                "ansible_user": srv.user,
                "net_os": srv.net_os,
            });
            if let Some(conn) = &srv.ansible_connection {
                vars["ansible_connection"] = json!(conn);
            }
            hostvars.insert(nick.clone(), vars);

            match groups.get_mut(&srv.group) {
                Some(members) => members.push(nick),
                None => all_hosts.push(nick),
            }
        }

        if children.is_empty() {
            all_hosts.push("localhost".to_string());
        }

        for (group, members) in groups {
            inv.insert(group, json!({ "hosts": members }));
        }
        inv.insert(
            "all".to_string(),
            json!({
                "children": children,
                "hosts": all_hosts,
                "vars": {
                    "ansible_user": "root",
                    "ansible_ssh_private_key_file": "~/.ssh/id_rsa",
                    "ansible_connection": "network_cli",
                    "ansible_network_os": "ios",
                    "netconf_template_os": "ios",
                    "ansible_python_interpreter": "/usr/bin/env python3",
                }
            }),
        );
        inv.insert("_meta".to_string(), json!({ "hostvars": hostvars }));
        Ok(Value::Object(inv))
    }

    /// Wait until every server accepts SSH on its management address
    pub async fn check_hosts_online(&self) -> Result<()> {
        self.wait_online(22, Duration::from_secs(600)).await
    }

    pub async fn wait_online(&self, port: u16, timeout: Duration) -> Result<()> {
        tracing::info!("Wait for connections to hosts ...");
        for srv in self.servers.iter().filter(|s| !s.mgmt_ip.is_empty()) {
            wait_for_connection(
                &srv.mgmt_ip,
                port,
                Duration::ZERO,
                timeout,
                Duration::from_secs(1),
                Duration::from_secs(5),
            )
            .await?;
            tracing::info!("{} is online", srv.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::servers::{NetAddrs, ServerInfo};
    use super::*;
    use crate::utils::TimedOut;
    use std::collections::HashMap;

    fn server(name: &str, ip: &str, group: &str, image: &str, meta: &[(&str, &str)]) -> ServerInfo {
        let mut nets = indexmap::IndexMap::new();
        nets.insert("wan0".to_string(), NetAddrs { ipv4: Some(ip.to_string()), ipv6: None });
        ServerInfo {
            name: name.to_string(),
            ansible_name: name.rsplit('_').next().unwrap_or(name).to_string(),
            nets,
            mgmt_name: "wan0".into(),
            mgmt_ip: ip.to_string(),
            srv_group: group.to_string(),
            image_name: image.to_string(),
            platform: "ios".into(),
            img_metadata: meta.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    fn lab() -> Servers {
        Servers {
            servers: vec![
                server("lab1_R2", "10.0.0.12", "routers", "csr1000v", &[]),
                server("lab1_R1", "10.0.0.11", "routers", "csr1000v", &[("ansible_connection", "network_cli")]),
                server("lab1_SRV1", "10.0.0.21", "servers", "centos", &[("ssh_user", "centos")]),
                server("lab1_vmanage", "10.0.0.31", "", "vmanage-20", &[]),
                server("lab1_win", "10.0.0.41", "servers", "win10", &[("net_os", "win")]),
            ],
        }
    }

    #[test]
    fn test_nick_name() {
        assert_eq!(nick_name("lab1_R12").unwrap(), "R12");
        assert_eq!(nick_name("lab1_SRV3").unwrap(), "SRV3");
        assert_eq!(nick_name("lab1_SRV").unwrap(), "lab1_SRV");
        assert_eq!(nick_name("lab1_vmanage").unwrap(), "vmanage");
        assert_eq!(nick_name("standalone").unwrap(), "standalone");
    }

    #[test]
    fn test_get_srv_nets_users() {
        let nets = lab().get_srv_nets("wan0").unwrap();
        let names: Vec<&String> = nets.keys().collect();
        assert_eq!(names, vec!["lab1_R1", "lab1_R2", "lab1_SRV1", "lab1_vmanage", "lab1_win"]);
        assert_eq!(nets["lab1_R1"].user, "root");
        assert_eq!(nets["lab1_R1"].ansible_connection.as_deref(), Some("network_cli"));
        assert_eq!(nets["lab1_SRV1"].user, "centos");
        assert_eq!(nets["lab1_vmanage"].user, "admin");
        assert_eq!(nets["lab1_win"].net_os, "win");
    }

    #[test]
    fn test_get_srv_nets_skips_missing_network() {
        assert!(lab().get_srv_nets("lan9").unwrap().is_empty());
    }

    #[test]
    fn test_dynamic_inventory() {
        let inv = lab().create_dynamic_inventory("wan0").unwrap();
        assert_eq!(inv["all"]["children"], json!(["routers", "servers"]));
        assert_eq!(inv["routers"]["hosts"], json!(["R1", "R2"]));
        // win hosts are left out
        assert_eq!(inv["servers"]["hosts"], json!(["SRV1"]));
        assert_eq!(inv["all"]["hosts"], json!(["vmanage"]));
        assert_eq!(inv["_meta"]["hostvars"]["R1"]["ansible_connection"], "network_cli");
        assert_eq!(inv["_meta"]["hostvars"]["vmanage"]["ansible_user"], "admin");
        assert!(inv["_meta"]["hostvars"].get("win").is_none());
        assert_eq!(inv["all"]["vars"]["ansible_python_interpreter"], "/usr/bin/env python3");
    }

    #[test]
    fn test_dynamic_inventory_without_groups() {
        let servers = Servers { servers: vec![server("lab2_R1", "10.1.0.1", "", "csr", &[])] };
        let inv = servers.create_dynamic_inventory("wan0").unwrap();
        assert_eq!(inv["all"]["hosts"], json!(["R1", "localhost"]));
        assert_eq!(inv["all"]["children"], json!([]));
    }

    #[test]
    fn test_get_srv_labs() {
        let labs = lab().get_srv_labs("wan0");
        let r1 = &labs["R1"];
        assert_eq!(r1.groups, vec!["routers"]);
        assert_eq!(r1.platform, "ios");
        let value = serde_json::to_value(r1).unwrap();
        assert_eq!(value["connection_options"], json!({}));
        assert!(serde_json::to_value(&labs["R2"]).unwrap().get("ansible_connection").is_none());
    }

    #[test]
    fn test_create_ansible_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts-example.yml");
        let engine = TemplateEngine::new(None).unwrap();
        lab().create_ansible_hosts(&engine, "wan0", &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("    lab1_R1:\n      ansible_host: 10.0.0.11\n"));
        assert!(text.contains("  vars:\n    ansible_user: root\n"));
    }

    #[tokio::test]
    async fn test_wait_online() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let servers = Servers { servers: vec![server("lab1_R1", "127.0.0.1", "", "csr", &[])] };
        servers.wait_online(port, Duration::from_secs(5)).await.unwrap();

        drop(listener);
        let err = servers.wait_online(port, Duration::from_millis(10)).await.unwrap_err();
        assert!(err.downcast_ref::<TimedOut>().is_some());
    }
}
