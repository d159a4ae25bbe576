pub mod client;
pub mod clouds;
pub mod inventory;
pub mod resources;
pub mod servers;
pub mod stack;
pub mod types;

pub use client::OpenStackClient;
pub use clouds::CloudConfig;
pub use inventory::{LabHost, SrvNet};
pub use resources::{Flavors, Images, Networks};
pub use servers::{ServerInfo, Servers};
pub use stack::Stack;

use anyhow::Result;

use crate::config::Config;

/// Authenticate against the configured cloud
pub async fn connect(config: &Config) -> Result<OpenStackClient> {
    let cloud = CloudConfig::load(&config.os_cloud, config.clouds_file.as_deref())?;
    OpenStackClient::connect(&cloud).await
}
