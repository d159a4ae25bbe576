use anyhow::{anyhow, Result};
use ipnetwork::IpNetwork;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera, Value};

use crate::utils::NotFoundError;

/// Built-in templates, overridable by `<name>.tera` or `<name>.j2` in the templates dir
const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    ("ansible_hosts", include_str!("../../templates/ansible_hosts.tera")),
    ("ansible_srvs", include_str!("../../templates/ansible_srvs.tera")),
    ("ansible_roles", include_str!("../../templates/ansible_roles.tera")),
    ("sdwan_init_controllers", include_str!("../../templates/sdwan_init_controllers.tera")),
    ("sdwan_init_cedges", include_str!("../../templates/sdwan_init_cedges.tera")),
    ("sdwan_enable_tunnel", include_str!("../../templates/sdwan_enable_tunnel.tera")),
    ("sdwan_feature_vpn", include_str!("../../templates/sdwan_feature_vpn.tera")),
    ("sdwan_feature_interfaces", include_str!("../../templates/sdwan_feature_interfaces.tera")),
    ("sdwan_feature_aaa", include_str!("../../templates/sdwan_feature_aaa.tera")),
    ("heat_stack", include_str!("../../templates/heat_stack.tera")),
];

/// Tera environment with the default templates and the `ipaddr` filter registered
#[derive(Clone)]
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    /// Load the built-in templates, then any overrides found in `templates_dir`
    pub fn new(templates_dir: Option<&Path>) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(DEFAULT_TEMPLATES.iter().copied())
            .map_err(|e| anyhow!("Failed to load built-in templates: {}", e))?;

        if let Some(dir) = templates_dir.filter(|d| d.is_dir()) {
            for ext in ["tera", "j2"] {
                let pattern = format!("{}/*.{}", dir.display(), ext);
                let paths = glob::glob(&pattern).map_err(|e| anyhow!("Bad template pattern {}: {}", pattern, e))?;
                for path in paths.flatten() {
                    let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                        continue;
                    };
                    tracing::debug!("Template override {} from {}", name, path.display());
                    tera.add_template_file(&path, Some(&name))
                        .map_err(|e| anyhow!("Failed to load template {}: {}", path.display(), e))?;
                }
            }
        }

        tera.register_filter("ipaddr", ipaddr_filter);
        Ok(Self { tera })
    }

    /// Render a named template with the given context
    pub fn render(&self, name: &str, context: &Context) -> Result<String> {
        if !self.tera.get_template_names().any(|n| n == name) {
            return Err(NotFoundError::new("template", name).into());
        }
        self.tera
            .render(name, context)
            .map_err(|e| anyhow!("Template rendering failed for {}: {}", name, render_error_chain(&e)))
    }

    /// Render a named template with a single variable
    pub fn render_with<T: Serialize>(&self, name: &str, key: &str, value: &T) -> Result<String> {
        let mut context = Context::new();
        context.insert(key, value);
        self.render(name, &context)
    }

    /// Render an arbitrary template file, exposing `data` to it
    pub fn render_file<T: Serialize>(&self, path: &Path, data: &T) -> Result<String> {
        let mut tera = self.tera.clone();
        let name = path.display().to_string();
        tera.add_template_file(path, Some(&name))
            .map_err(|e| anyhow!("Failed to load template {}: {}", name, e))?;
        let mut context = Context::new();
        context.insert("data", data);
        tera.render(&name, &context)
            .map_err(|e| anyhow!("Template rendering failed for {}: {}", name, render_error_chain(&e)))
    }
}

fn render_error_chain(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        msg.push_str(&format!(": {}", inner));
        source = inner.source();
    }
    msg
}

/// `{{ "10.1.1.5/24" | ipaddr(part="netmask") }}` -> `255.255.255.0`
fn ipaddr_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let input = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("ipaddr filter expects a string"))?;
    let net: IpNetwork = input
        .parse()
        .map_err(|e| tera::Error::msg(format!("ipaddr: invalid network '{}': {}", input, e)))?;
    let part = args.get("part").and_then(|v| v.as_str()).unwrap_or("address");

    let out = match part {
        "address" => Value::String(net.ip().to_string()),
        "netmask" => Value::String(net.mask().to_string()),
        "hostmask" => Value::String(hostmask(&net)),
        "network" => Value::String(net.network().to_string()),
        "prefix" => Value::from(net.prefix()),
        _ => Value::String(String::new()),
    };
    Ok(out)
}

fn hostmask(net: &IpNetwork) -> String {
    match net {
        IpNetwork::V4(v4) => std::net::Ipv4Addr::from(!u32::from(v4.mask())).to_string(),
        IpNetwork::V6(v6) => std::net::Ipv6Addr::from(!u128::from(v6.mask())).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(input: &str, part: &str) -> Value {
        let mut args = HashMap::new();
        args.insert("part".to_string(), Value::String(part.to_string()));
        ipaddr_filter(&Value::String(input.to_string()), &args).unwrap()
    }

    #[test]
    fn test_ipaddr_parts() {
        assert_eq!(filter("10.1.1.5/24", "address"), "10.1.1.5");
        assert_eq!(filter("10.1.1.5/24", "netmask"), "255.255.255.0");
        assert_eq!(filter("10.1.1.5/24", "hostmask"), "0.0.0.255");
        assert_eq!(filter("10.1.1.5/24", "network"), "10.1.1.0");
        assert_eq!(filter("10.1.1.5/24", "prefix"), 24);
        assert_eq!(filter("10.1.1.5/24", "bogus"), "");
    }

    #[test]
    fn test_ipaddr_rejects_garbage() {
        let args = HashMap::new();
        assert!(ipaddr_filter(&Value::String("nope".into()), &args).is_err());
    }

    #[test]
    fn test_builtin_templates_compile() {
        let engine = TemplateEngine::new(None).unwrap();
        for (name, _) in DEFAULT_TEMPLATES {
            assert!(engine.tera.get_template_names().any(|n| n == *name), "{}", name);
        }
    }

    #[test]
    fn test_unknown_template_is_not_found() {
        let engine = TemplateEngine::new(None).unwrap();
        let err = engine.render("missing", &Context::new()).unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[test]
    fn test_override_and_render_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ansible_roles.j2"), "roles={{ data | length }}").unwrap();
        let custom = dir.path().join("custom.txt");
        std::fs::write(&custom, "net {{ data | ipaddr(part=\"network\") }}").unwrap();

        let engine = TemplateEngine::new(Some(dir.path())).unwrap();
        let out = engine.render_with("ansible_roles", "data", &vec!["a", "b"]).unwrap();
        assert_eq!(out, "roles=2");

        let out = engine.render_file(&custom, &"192.168.7.9/25").unwrap();
        assert_eq!(out, "net 192.168.7.0");
    }
}
