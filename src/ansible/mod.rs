use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::Config;
use crate::templates::TemplateEngine;

pub const PLAYBOOK_FILE: &str = "gen_playbook.yml";
pub const INVENTORY_FILE: &str = "gen_inventory.yml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabConfig {
    #[serde(default)]
    pub ansible_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostData {
    #[serde(default)]
    pub lab_config: LabConfig,
}

/// One host of a Nornir-style hosts file. `ipv4` is accepted for `hostname`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabInventoryHost {
    #[serde(default, alias = "ipv4")]
    pub hostname: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ansible_connection: Option<String>,
    #[serde(default)]
    pub data: HostData,
}

#[derive(Debug, Serialize)]
struct InventoryHost<'a> {
    hostname: &'a str,
    platform: &'a str,
    connection: &'a str,
}

#[derive(Debug, Serialize)]
struct InventoryData<'a> {
    hosts: BTreeMap<&'a str, InventoryHost<'a>>,
    groups: BTreeMap<&'a str, Vec<&'a str>>,
}

/// Hosts that get one role
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleHosts {
    pub role: String,
    pub hosts: Vec<String>,
}

/// Playbook of the roles requested by lab hosts
pub struct RolesPlaybook {
    pub hosts: IndexMap<String, LabInventoryHost>,
}

impl RolesPlaybook {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let hosts: IndexMap<String, LabInventoryHost> = serde_yaml::from_str(text).context("Invalid hosts file")?;
        tracing::info!("Lab hosts: {}", hosts.len());
        Ok(Self { hosts })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hosts file {}", path.display()))?;
        Self::from_yaml(&text)
    }

    /// Role to hosts, roles in first-seen order
    pub fn roles(&self) -> Vec<RoleHosts> {
        let mut roles: IndexMap<&str, Vec<String>> = IndexMap::new();
        for (name, host) in &self.hosts {
            for role in &host.data.lab_config.ansible_roles {
                roles.entry(role.as_str()).or_default().push(name.clone());
            }
        }
        roles
            .into_iter()
            .map(|(role, hosts)| RoleHosts { role: role.to_string(), hosts })
            .collect()
    }

    pub fn render_inventory(&self, engine: &TemplateEngine) -> Result<String> {
        let mut data = InventoryData {
            hosts: BTreeMap::new(),
            groups: BTreeMap::new(),
        };
        for (name, host) in &self.hosts {
            data.hosts.insert(
                name,
                InventoryHost {
                    hostname: &host.hostname,
                    platform: &host.platform,
                    connection: host.ansible_connection.as_deref().unwrap_or(""),
                },
            );
            for group in host.groups.iter().filter(|g| !g.is_empty()) {
                data.groups.entry(group).or_default().push(name);
            }
        }
        engine.render_with("ansible_srvs", "data", &data)
    }

    pub fn render_playbook(&self, engine: &TemplateEngine) -> Result<String> {
        engine.render_with("ansible_roles", "data", &self.roles())
    }

    /// Write the inventory and playbook into `out_dir`, returning their paths
    pub fn write(&self, engine: &TemplateEngine, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        let inventory = out_dir.join(INVENTORY_FILE);
        let playbook = out_dir.join(PLAYBOOK_FILE);
        std::fs::write(&inventory, self.render_inventory(engine)?)?;
        std::fs::write(&playbook, self.render_playbook(engine)?)?;
        tracing::info!("Playbook written to {}", playbook.display());
        Ok((inventory, playbook))
    }

    /// Generate both files and run ansible-playbook; returns its exit code
    pub async fn run(&self, config: &Config, engine: &TemplateEngine) -> Result<i32> {
        if self.roles().is_empty() {
            tracing::warn!("No ansible roles requested by any host");
        }
        let (inventory, playbook) = self.write(engine, &config.output_dir)?;
        run_playbook(&config.ansible_playbook, &inventory, &playbook, &config.ansible_roles_path).await
    }
}

pub async fn run_playbook(program: &str, inventory: &Path, playbook: &Path, roles_path: &str) -> Result<i32> {
    tracing::info!("Run ansible playbooks");
    let status = Command::new(program)
        .arg("-i")
        .arg(inventory)
        .arg(playbook)
        .env("ANSIBLE_ROLES_PATH", roles_path)
        .status()
        .await
        .with_context(|| format!("Failed to start {}", program))?;

    let code = status.code().ok_or_else(|| anyhow!("{} terminated by signal", program))?;
    if code == 0 {
        tracing::info!("ansible-playbook finished successfully");
    } else {
        tracing::error!("ansible-playbook exited with {}", code);
    }
    Ok(code)
}
