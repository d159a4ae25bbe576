use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::Serialize;

/// Namespace of the metadata Nova writes into libvirt domains
const NOVA_NS: &str = "http://openstack.org/xmlns/libvirt/nova/1.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KvmInterfaceInfo {
    pub name: String,
    pub int_type: String,
    pub mac_addr: String,
    pub dev: String,
    pub bridge: String,
    pub mtu: String,
    pub model: String,
}

impl std::fmt::Display for KvmInterfaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "name: {:8} mac: {:15} dev: {:16} br: {:16} model: {:10} mtu: {:5}",
            self.name, self.mac_addr, self.dev, self.bridge, self.model, self.mtu
        )
    }
}

/// Libvirt domain of a Nova instance
#[derive(Debug, Clone, Default, Serialize)]
pub struct KvmInstanceInfo {
    pub name: String,
    pub uri_qemu: String,
    #[serde(skip)]
    pub xml: String,
    pub uuid: String,
    pub nova_name: String,
    /// Keyed by interface alias
    pub interfaces: IndexMap<String, KvmInterfaceInfo>,
}

impl std::fmt::Display for KvmInstanceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:5} {:20} {}", self.name, self.uuid, self.nova_name)?;
        for intf in self.interfaces.values() {
            write!(f, "\n  {}", intf)?;
        }
        Ok(())
    }
}

impl KvmInstanceInfo {
    /// Parse an already fetched domain XML
    pub fn from_xml(xml: &str, uri_qemu: &str) -> Result<Self> {
        let mut info = Self {
            uri_qemu: uri_qemu.to_string(),
            xml: xml.to_string(),
            ..Default::default()
        };
        info.analyze_xml()?;
        Ok(info)
    }

    /// Fetch the domain XML of `name` from the hypervisor at `uri_qemu` and parse it
    pub async fn fetch(uri_qemu: &str, name: &str, virsh: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(anyhow!("Did not find name of instance"));
        }
        let xml = get_xml_description(uri_qemu, name, virsh).await?;
        Self::from_xml(&xml, uri_qemu)
    }

    pub fn analyze_xml(&mut self) -> Result<()> {
        let doc = roxmltree::Document::parse(&self.xml).context("Invalid domain XML")?;
        let domain = doc.root_element();

        self.name = child_text(domain, "name");
        self.uuid = child_text(domain, "uuid");
        self.nova_name = domain
            .descendants()
            .find(|n| n.tag_name().name() == "name" && n.tag_name().namespace() == Some(NOVA_NS))
            .and_then(|n| n.text())
            .unwrap_or_default()
            .to_string();
        tracing::info!("Domain {} nova name: {}", self.name, self.nova_name);

        self.interfaces.clear();
        let devices = domain.children().filter(|n| n.has_tag_name("devices"));
        for elem in devices.flat_map(|d| d.children()).filter(|n| n.has_tag_name("interface")) {
            let intf = KvmInterfaceInfo {
                name: child_attr(elem, "alias", "name"),
                int_type: elem.attribute("type").unwrap_or_default().to_string(),
                mac_addr: child_attr(elem, "mac", "address"),
                dev: child_attr(elem, "target", "dev"),
                bridge: child_attr(elem, "source", "bridge"),
                mtu: child_attr(elem, "mtu", "size"),
                model: child_attr(elem, "model", "type"),
            };
            tracing::debug!("{}", intf);
            self.interfaces.insert(intf.name.clone(), intf);
        }
        tracing::info!("Total found interfaces: {}", self.interfaces.len());
        Ok(())
    }
}

fn child_text(node: roxmltree::Node<'_, '_>, tag: &str) -> String {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn child_attr(node: roxmltree::Node<'_, '_>, tag: &str, attr: &str) -> String {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.attribute(attr))
        .unwrap_or_default()
        .to_string()
}

/// Domain XML through libvirt
#[cfg(feature = "libvirt")]
pub async fn get_xml_description(uri_qemu: &str, name: &str, _virsh: &str) -> Result<String> {
    use virt::connect::Connect;
    use virt::domain::Domain;

    let uri = uri_qemu.to_string();
    let name = name.to_string();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut conn = Connect::open(Some(uri.as_str())).map_err(|e| anyhow!("Failed to open connection to {}: {}", uri, e))?;
        tracing::info!("Connection to {} successful", uri);
        let xml = Domain::lookup_by_name(&conn, &name)
            .and_then(|dom| dom.get_xml_desc(0))
            .map_err(|e| anyhow!("Domain {} on {}: {}", name, uri, e));
        if let Err(e) = conn.close() {
            tracing::warn!("Failed to close libvirt connection: {}", e);
        }
        xml
    })
    .await
    .map_err(|e| anyhow!("Task join error: {}", e))?
}

/// Domain XML through `virsh dumpxml`
#[cfg(not(feature = "libvirt"))]
pub async fn get_xml_description(uri_qemu: &str, name: &str, virsh: &str) -> Result<String> {
    let output = tokio::process::Command::new(virsh)
        .arg("--connect")
        .arg(uri_qemu)
        .arg("dumpxml")
        .arg(name)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", virsh))?;

    if !output.status.success() {
        return Err(anyhow!(
            "virsh dumpxml {} failed: {}",
            name,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
