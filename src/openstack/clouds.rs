use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::utils::NotFoundError;

/// Password credentials of one `clouds.yaml` entry
#[derive(Debug, Clone, Deserialize)]
pub struct CloudAuth {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_domain")]
    pub user_domain_name: String,
    #[serde(default = "default_domain")]
    pub project_domain_name: String,
}

fn default_domain() -> String {
    "Default".to_string()
}

fn default_interface() -> String {
    "public".to_string()
}

fn default_verify() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    pub auth: CloudAuth,
    #[serde(default)]
    pub region_name: Option<String>,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_verify")]
    pub verify: bool,
}

#[derive(Debug, Deserialize)]
struct CloudsFile {
    clouds: HashMap<String, CloudConfig>,
}

impl CloudConfig {
    /// Parse `clouds.yaml` text and pick the named cloud
    pub fn from_yaml(text: &str, cloud: &str) -> Result<Self> {
        let mut file: CloudsFile = serde_yaml::from_str(text).context("Invalid clouds.yaml")?;
        file.clouds
            .remove(cloud)
            .ok_or_else(|| NotFoundError::new("cloud", cloud).into())
    }

    /// Load the named cloud from `explicit` or the usual clouds.yaml locations
    pub fn load(cloud: &str, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => search_paths()
                .into_iter()
                .find(|p| p.is_file())
                .ok_or_else(|| NotFoundError::new("clouds.yaml", "search path"))?,
        };
        tracing::debug!("Loading cloud {} from {}", cloud, path.display());
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&text, cloud)
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("clouds.yaml")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(Path::new(&home).join(".config/openstack/clouds.yaml"));
    }
    paths.push(PathBuf::from("/etc/openstack/clouds.yaml"));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLOUDS: &str = "
clouds:
  ops_work:
    auth:
      auth_url: http://10.0.0.1:5000
      username: admin
      password: secret
      project_name: lab
    region_name: RegionOne
    verify: false
";

    #[test]
    fn test_from_yaml_defaults() {
        let cloud = CloudConfig::from_yaml(CLOUDS, "ops_work").unwrap();
        assert_eq!(cloud.auth.username, "admin");
        assert_eq!(cloud.auth.user_domain_name, "Default");
        assert_eq!(cloud.interface, "public");
        assert!(!cloud.verify);
        assert_eq!(cloud.region_name.as_deref(), Some("RegionOne"));
    }

    #[test]
    fn test_unknown_cloud() {
        let err = CloudConfig::from_yaml(CLOUDS, "prod").unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clouds.yaml");
        std::fs::write(&path, CLOUDS).unwrap();
        let cloud = CloudConfig::load("ops_work", Some(&path)).unwrap();
        assert_eq!(cloud.auth.auth_url, "http://10.0.0.1:5000");
    }
}
