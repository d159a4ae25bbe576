use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use super::client::OpenStackClient;
use super::types::StackCreate;

/// Heat stack created from a template file
pub struct Stack<'a> {
    cloud: &'a OpenStackClient,
    pub name: String,
    pub template_file: PathBuf,
    /// Seconds
    pub timeout: u64,
    pub rollback: bool,
    pub poll_interval: Duration,
}

impl<'a> Stack<'a> {
    pub fn new(cloud: &'a OpenStackClient, name: &str, template_file: PathBuf) -> Self {
        tracing::info!("Name stack: {} Template file: {}", name, template_file.display());
        Self {
            cloud,
            name: name.to_string(),
            template_file,
            timeout: 3600,
            rollback: false,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Current stack status, empty when the stack does not exist
    pub async fn check_status(&self) -> Result<String> {
        tracing::info!("Check stack name: {}", self.name);
        Ok(self
            .cloud
            .get_stack(&self.name)
            .await?
            .map(|s| s.stack_status)
            .unwrap_or_default())
    }

    /// Create the stack unless it exists, then wait for Heat to finish.
    /// Returns the final stack status.
    pub async fn create(&self) -> Result<String> {
        let status = self.check_status().await?;
        if !status.is_empty() {
            tracing::info!("Stack {} exists: {}", self.name, status);
            return Ok(status);
        }

        tracing::info!("Stack does not exist, creating: {}", self.name);
        let template = std::fs::read_to_string(&self.template_file)
            .with_context(|| format!("Failed to read template {}", self.template_file.display()))?;
        let created = self
            .cloud
            .create_stack(&StackCreate {
                stack_name: &self.name,
                template: &template,
                disable_rollback: !self.rollback,
                timeout_mins: self.timeout.div_ceil(60),
            })
            .await?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.timeout);
        loop {
            let status = self
                .cloud
                .get_stack(&created.id)
                .await?
                .map(|s| s.stack_status)
                .ok_or_else(|| anyhow!("Stack {} disappeared while creating", self.name))?;
            if !status.ends_with("_IN_PROGRESS") {
                tracing::info!("Status created stack: {}", status);
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow!("Stack {} still {} after {}s", self.name, status, self.timeout));
            }
            tracing::debug!("Stack {}: {}", self.name, status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
