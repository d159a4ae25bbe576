pub mod client;
pub mod pki;
pub mod types;

pub use client::{ApiResponse, VManageClient};
pub use pki::Pki;
pub use types::*;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use reqwest::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tera::Context as TeraContext;

use crate::config::Config;
use crate::templates::TemplateEngine;
use crate::utils;

/// Certificate states of vEdge licences that are still unassigned
const FREE_LICENCE_STATES: &[&str] = &["bootstrapconfiggenerated", "tokengenerated"];

fn config_lines(config: &str) -> Vec<String> {
    config.lines().map(str::to_string).collect()
}

/// SD-WAN fabric described by one YAML file, bootstrapped through SSH and vManage
pub struct Viptela {
    pub conf: SdwanGlobal,
    pub controllers: Controllers,
    pub vedges: IndexMap<String, Vedge>,
    pub templates: Vec<ViptelaTemplate>,
    pub pki: Pki,
    engine: TemplateEngine,
    client: Option<VManageClient>,
    ssh_timeout: u64,
    /// Pause after pushing init configs to controllers
    pub controller_settle: Duration,
    /// Pause after pushing init configs to edges
    pub edge_settle: Duration,
    /// Pause after the root cert chain sync
    pub sync_settle: Duration,
}

impl Viptela {
    /// Read the YAML file, generate the root CA when asked to, and build every device
    pub async fn load(path: &Path, config: &Config, engine: TemplateEngine) -> Result<Self> {
        tracing::info!("Load SD-WAN config {}", path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read SD-WAN config {}", path.display()))?;
        let sdwan: SdwanConfig = serde_yaml::from_str(&text).context("Invalid SD-WAN config")?;
        let viptela = Self::from_config(sdwan, engine, &config.openssl, config.ssh_timeout)?;
        if viptela.conf.gen_rootca {
            viptela.pki.generate_rootca().await?;
        }
        Ok(viptela)
    }

    pub fn from_config(sdwan: SdwanConfig, engine: TemplateEngine, openssl: &str, ssh_timeout: u64) -> Result<Self> {
        let SdwanConfig { all, controllers, vedges, cedges, templates } = sdwan;

        tracing::info!("Generate info about controllers");
        let mut controllers = Controllers {
            vmanage: Controller::from_spec(DeviceKind::Vmanage, &controllers.vmanage)?,
            vsmart: Controller::from_spec(DeviceKind::Vsmart, &controllers.vsmart)?,
            vbond: Controller::from_spec(DeviceKind::Vbond, &controllers.vbond)?,
        };
        let bond_ip = controllers.vbond.vpn0_ip.clone();
        for ctrl in controllers.iter_mut() {
            tracing::info!("Generate init-config for {}", ctrl.dv_type);
            ctrl.init_config = render_init_config(&engine, &*ctrl, DeviceKind::Vmanage, &all.org, all.site_id, &bond_ip)?;
            tracing::debug!("{}", ctrl);
        }

        tracing::info!("Generate info about vedges/cedges");
        let mut edges = IndexMap::new();
        let specs = vedges
            .iter()
            .map(|(k, s)| (DeviceKind::Vedge, k, s))
            .chain(cedges.iter().map(|(k, s)| (DeviceKind::Cedge, k, s)));
        for (kind, key, spec) in specs {
            tracing::info!("Add info {}: {}", kind, key);
            let mut edge = Vedge::from_spec(kind, key, spec)?;
            edge.init_config = render_init_config(&engine, &edge, kind, &all.org, edge.site_id, &bond_ip)?;
            tracing::debug!("{}", edge);
            edges.insert(key.clone(), edge);
        }

        tracing::info!("Generate info about templates");
        for template in &templates {
            template.validate()?;
            tracing::debug!("{}", template);
        }

        Ok(Self {
            pki: Pki::new(openssl, &all.cert_path),
            conf: all,
            controllers,
            vedges: edges,
            templates,
            engine,
            client: None,
            ssh_timeout,
            controller_settle: Duration::from_secs(30),
            edge_settle: Duration::from_secs(10),
            sync_settle: Duration::from_secs(10),
        })
    }

    pub fn bond_ip(&self) -> &str {
        &self.controllers.vbond.vpn0_ip
    }

    pub fn base_url(&self) -> String {
        let vmanage = &self.controllers.vmanage;
        match vmanage.port {
            Some(port) => format!("https://{}:{}", vmanage.mgmt_ip, port),
            None => format!("https://{}", vmanage.mgmt_ip),
        }
    }

    /// Log in to vManage
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.base_url();
        self.connect_to(&url).await
    }

    pub async fn connect_to(&mut self, base_url: &str) -> Result<()> {
        let mut client = VManageClient::new(base_url)?;
        client.login(&self.conf.user, &self.conf.pass).await?;
        self.client = Some(client);
        Ok(())
    }

    fn client(&self) -> Result<&VManageClient> {
        self.client
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected to vManage"))
    }

    pub fn enable_tunnel_config<T: Serialize>(&self, val: &T) -> Result<String> {
        self.engine.render_with("sdwan_enable_tunnel", "val", val)
    }

    pub fn feature_template(&self, template: &ViptelaTemplate) -> Result<String> {
        tracing::info!("Generate template {}", template.t_scope.template_name());
        self.engine.render_with(template.t_scope.template_name(), "val", template)
    }

    /// Run commands in an interactive shell on the device; the transcript embeds any error
    pub async fn send_command_to_device(
        &self,
        ip: &str,
        commands: Vec<String>,
        expect: &str,
        delay_factor: u32,
    ) -> String {
        utils::ssh_send_commands_async(
            ip,
            &self.conf.user,
            &self.conf.pass,
            commands,
            expect,
            delay_factor,
            self.ssh_timeout,
        )
        .await
    }

    async fn copy_rootca(&self, ip: &str) -> Result<()> {
        utils::scp_upload_async(
            ip,
            &self.conf.user,
            &self.conf.pass,
            &self.pki.rootca_cert(),
            pki::ROOTCA_CERT,
            self.ssh_timeout,
        )
        .await
    }

    pub async fn initialize_controllers(&self) -> Result<()> {
        tracing::info!("Configure controllers with init-config");
        for ctrl in self.controllers.iter() {
            tracing::info!("Configure {} with init-config", ctrl.dv_type);
            self.send_command_to_device(&ctrl.mgmt_ip, config_lines(&ctrl.init_config), "#", 1)
                .await;
        }
        tokio::time::sleep(self.controller_settle).await;

        tracing::info!("Copy rootCA to controllers");
        for ctrl in self.controllers.iter() {
            self.copy_rootca(&ctrl.mgmt_ip).await?;
        }

        tracing::info!("Change settings on vmanage");
        self.set_vmanage_settings().await?;

        tracing::info!("Install root certificate on controllers");
        let install = format!("request root-cert-chain install /home/admin/{}", pki::ROOTCA_CERT);
        for ctrl in self.controllers.iter() {
            tracing::info!("Install rootCA on {}", ctrl.dv_type);
            self.send_command_to_device(&ctrl.mgmt_ip, vec![install.clone()], "#", 1)
                .await;
        }
        self.sync_root_cert().await?;
        tokio::time::sleep(self.sync_settle).await;

        let client = self.client()?;
        for ctrl in [&self.controllers.vsmart, &self.controllers.vbond] {
            tracing::info!("Add '{}' to vmanage", ctrl.dv_type);
            client
                .add_controller(&ControllerAdd {
                    device_ip: &ctrl.vpn0_ip,
                    username: &self.conf.user,
                    password: &self.conf.pass,
                    personality: ctrl.dv_type.as_str(),
                    generate_csr: false,
                })
                .await?;
        }

        tracing::info!("Get CSR from controllers");
        for ctrl in self.controllers.iter() {
            let ip = match ctrl.dv_type {
                DeviceKind::Vmanage => &ctrl.sys_ip,
                _ => &ctrl.vpn0_ip,
            };
            self.install_controller_cert(ip, ctrl.dv_type).await?;
        }

        tracing::info!("Enable transport on controllers");
        for ctrl in self.controllers.iter() {
            let config = self.enable_tunnel_config(ctrl)?;
            tracing::info!("{}", config);
            self.send_command_to_device(&ctrl.mgmt_ip, config_lines(&config), "#", 1)
                .await;
        }
        Ok(())
    }

    async fn set_vmanage_settings(&self) -> Result<()> {
        let client = self.client()?;
        let rootca = self.pki.read_rootca().await?;
        if client.get_org().await? != self.conf.org.trim() {
            client.set_org(&self.conf.org).await?;
        }
        if client.get_ca_type().await? != "enterprise" {
            client.set_ca_type("enterprise").await?;
        }
        client.set_root_cert(&rootca).await?;
        client.set_vbond(self.bond_ip()).await?;
        tracing::info!(
            "vManage org: {} CA: {} vBond: {}",
            client.get_org().await?,
            client.get_ca_type().await?,
            client.get_vbond().await?
        );
        Ok(())
    }

    /// CSR from vManage, signed by the root CA, installed back on vManage
    async fn install_controller_cert(&self, device_ip: &str, kind: DeviceKind) -> Result<()> {
        let client = self.client()?;
        tracing::info!("Get CSR certificate for {} ({})", device_ip, kind);
        let csr = client.generate_csr(device_ip).await?;
        let crt = self.pki.sign_csr(kind.as_str(), &csr).await?;
        tracing::info!("Install CRT certificate {}.crt to {}", kind, device_ip);
        let result = client.install_device_cert(&crt).await?;
        tracing::debug!("{}", result);
        Ok(())
    }

    pub async fn initialize_vedges(&mut self) -> Result<()> {
        tracing::info!("Configure vedges/cedges with init-config");
        for (name, edge) in &self.vedges {
            tracing::info!("Configure {}", name);
            self.send_command_to_device(&edge.mgmt_ip, config_lines(&edge.init_config), "#", 1)
                .await;
        }
        tokio::time::sleep(self.edge_settle).await;

        tracing::info!("Copy rootCA to vedges");
        for (name, edge) in &self.vedges {
            tracing::info!("Copy rootCA to {}", name);
            match edge.dv_type {
                DeviceKind::Cedge => {
                    let copy = format!("copy tftp://{}/{} bootflash:", self.conf.tftp_server, pki::ROOTCA_CERT);
                    tracing::debug!("Cmd to run: '{}'", copy);
                    self.send_command_to_device(
                        &edge.mgmt_ip,
                        vec![format!("delete /force bootflash:{}", pki::ROOTCA_CERT)],
                        "#",
                        1,
                    )
                    .await;
                    self.send_command_to_device(&edge.mgmt_ip, vec![copy], r"\?", 1).await;
                }
                _ => self.copy_rootca(&edge.mgmt_ip).await?,
            }
        }

        tracing::info!("Install rootCA to vedges");
        for (name, edge) in &self.vedges {
            let (install, delay_factor) = match edge.dv_type {
                DeviceKind::Cedge => (
                    format!("request platform software sdwan root-cert-chain install bootflash:{}", pki::ROOTCA_CERT),
                    10,
                ),
                _ => (format!("request root-cert-chain install /home/admin/{}", pki::ROOTCA_CERT), 2),
            };
            tracing::info!("Install rootCA on {}", name);
            tracing::debug!("Cmd to run: '{}'", install);
            self.send_command_to_device(&edge.mgmt_ip, vec![install], "#", delay_factor)
                .await;
        }

        tracing::info!("Enable transport tunnel");
        for (name, edge) in &self.vedges {
            tracing::info!("Enable transport tunnel on {}", name);
            let config = self.enable_tunnel_config(edge)?;
            tracing::debug!("{}", config);
            self.send_command_to_device(&edge.mgmt_ip, config_lines(&config), "#", 1)
                .await;
        }

        let mut free = self.get_free_bootstrap_device("vedges").await?;
        tracing::debug!("{:?}", free);
        for (name, edge) in self.vedges.iter_mut() {
            let licence = free
                .get_mut(&edge.vm_model)
                .filter(|l| !l.is_empty())
                .map(|l| l.remove(0))
                .ok_or_else(|| anyhow!("No free licence of model {} left for {}", edge.vm_model, name))?;
            edge.reg_chassis = licence.uuid;
            edge.reg_token = licence.serial_number;
        }

        tracing::info!("Register vedges/cedges on vmanage");
        let client = self.client()?;
        for (name, edge) in &self.vedges {
            tracing::info!("Get bootstrap for {} from vmanage", name);
            client.get_bootstrap(&edge.reg_chassis).await?;
            let (activate, delay_factor) = match edge.dv_type {
                DeviceKind::Cedge => (
                    format!(
                        "request platform software sdwan vedge_cloud activate chassis-number {} token {}",
                        edge.reg_chassis, edge.reg_token
                    ),
                    10,
                ),
                _ => (
                    format!(
                        "request vedge-cloud activate chassis-number {} token {}",
                        edge.reg_chassis, edge.reg_token
                    ),
                    2,
                ),
            };
            tracing::info!("Register {} on vmanage: '{}'", name, activate);
            self.send_command_to_device(&edge.mgmt_ip, vec![activate], "#", delay_factor)
                .await;
        }
        Ok(())
    }

    /// Device model to unassigned licences, in vManage order
    pub async fn get_free_bootstrap_device(&self, kind: &str) -> Result<BTreeMap<String, Vec<FreeLicence>>> {
        tracing::debug!("Get Devices list '{}'", kind);
        let mut free: BTreeMap<String, Vec<FreeLicence>> = BTreeMap::new();
        for dev in self.client()?.get_device_list(kind).await? {
            if !FREE_LICENCE_STATES.contains(&dev.vedge_certificate_state.as_str()) {
                continue;
            }
            tracing::debug!("{}: {} {}", dev.vedge_certificate_state, dev.uuid, dev.serial_number);
            free.entry(dev.device_model).or_default().push(FreeLicence {
                uuid: dev.uuid,
                serial_number: dev.serial_number,
            });
        }
        Ok(free)
    }

    pub async fn load_serial_file(&self) -> Result<()> {
        tracing::info!("Load license file {}", self.conf.serial_file);
        let result = self
            .client()?
            .upload_serial_file(Path::new(&self.conf.serial_file))
            .await?;
        tracing::info!("{}", result);
        Ok(())
    }

    pub async fn push_cert_to_controllers(&self) -> Result<()> {
        tracing::info!("Push certificates to controllers");
        let result = self.client()?.push_certificates().await?;
        tracing::info!("{}", result);
        Ok(())
    }

    pub async fn sync_root_cert(&self) -> Result<()> {
        tracing::info!("Sync rootCA");
        self.client()?.sync_root_cert().await
    }

    /// Post every feature template; returns how many vManage accepted
    pub async fn import_templates(&self) -> Result<usize> {
        let client = self.client()?;
        let mut imported = 0;
        for template in &self.templates {
            tracing::info!(
                "Import template name: '{}' type: '{}' scope: '{}'",
                template.name,
                template.t_type,
                template.t_scope.template_name()
            );
            let body = self.feature_template(template)?;
            serde_json::from_str::<serde_json::Value>(&body)
                .with_context(|| format!("Template {} rendered invalid JSON", template.name))?;
            tracing::debug!("{}", body);
            let resp = client
                .http_request("/dataservice/template/feature/", Method::POST, Some(body))
                .await?;
            if resp.is_ok() {
                imported += 1;
            }
        }
        Ok(imported)
    }
}

fn render_init_config<T: Serialize>(
    engine: &TemplateEngine,
    val: &T,
    kind: DeviceKind,
    org: &str,
    site_id: u32,
    bond_ip: &str,
) -> Result<String> {
    let template = match kind {
        DeviceKind::Cedge => "sdwan_init_cedges",
        _ => "sdwan_init_controllers",
    };
    let mut context = TeraContext::new();
    context.insert("val", val);
    context.insert("org", org);
    context.insert("site_id", &site_id);
    context.insert("bond_ip", bond_ip);
    let config = engine.render(template, &context)?;
    tracing::debug!("{}", config);
    Ok(config)
}

impl fmt::Display for Viptela {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "org: {}", self.conf.org)?;
        writeln!(f, "vm_user: {}", self.conf.user)?;
        writeln!(f, "site_id: {}", self.conf.site_id)?;
        writeln!(f, "cert_path: {}", self.conf.cert_path)?;
        writeln!(f, "gen_rootca: {}", self.conf.gen_rootca)?;
        writeln!(f, "base_url: {}", self.base_url())?;
        for ctrl in self.controllers.iter() {
            writeln!(f, "{}", ctrl)?;
        }
        for edge in self.vedges.values() {
            writeln!(f, "{}", edge)?;
        }
        for template in &self.templates {
            writeln!(f, "{}", template)?;
        }
        Ok(())
    }
}
