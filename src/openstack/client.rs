use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::clouds::CloudConfig;
use super::types::*;
use crate::utils::NotFoundError;

/// Nova microversion that embeds flavor names and extended server attributes
const COMPUTE_MICROVERSION: &str = "2.79";

/// Public endpoints of the services used by the toolkit
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub compute: String,
    pub image: String,
    pub network: String,
    pub orchestration: Option<String>,
}

/// OpenStack API client authenticated against Keystone v3
pub struct OpenStackClient {
    client: Client,
    token: String,
    endpoints: Endpoints,
}

impl OpenStackClient {
    /// Authenticate with password credentials and resolve endpoints from the catalog
    pub async fn connect(cloud: &CloudConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!cloud.verify)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        let auth = &cloud.auth;
        let scope = match (&auth.project_id, &auth.project_name) {
            (Some(id), _) => Some(json!({ "project": { "id": id } })),
            (None, Some(name)) => Some(json!({ "project": { "name": name, "domain": { "name": auth.project_domain_name } } })),
            (None, None) => None,
        };
        let mut body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": auth.username,
                            "domain": { "name": auth.user_domain_name },
                            "password": auth.password,
                        }
                    }
                }
            }
        });
        if let Some(scope) = scope {
            body["auth"]["scope"] = scope;
        }

        let url = format!("{}/v3/auth/tokens", auth.auth_url.trim_end_matches('/').trim_end_matches("/v3"));
        let resp = client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Keystone authentication failed {}: {}", status, body));
        }

        let token = resp
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Keystone response has no X-Subject-Token header"))?;
        let catalog: TokenResponse = resp.json().await.context("Invalid Keystone token body")?;

        let endpoints = resolve_endpoints(&catalog.token.catalog, &cloud.interface, cloud.region_name.as_deref())?;
        tracing::info!("Openstack connected: compute {}", endpoints.compute);

        Ok(Self { client, token, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("X-Auth-Token", &self.token).header("Accept", "application/json")
    }

    fn compute(&self, req: RequestBuilder) -> RequestBuilder {
        self.authed(req)
            .header("OpenStack-API-Version", format!("compute {}", COMPUTE_MICROVERSION))
            .header("X-OpenStack-Nova-API-Version", COMPUTE_MICROVERSION)
    }

    /// Send and decode, treating any non-success status as an error
    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OpenStack API error {}: {}", status, body));
        }
        Ok(resp.json().await?)
    }

    /// Like [`fetch`](Self::fetch) but 404 maps to `None`
    async fn fetch_opt<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>> {
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OpenStack API error {}: {}", status, body));
        }
        Ok(Some(resp.json().await?))
    }

    // --- Compute ---

    pub async fn list_flavors(&self) -> Result<Vec<OsFlavor>> {
        let url = format!("{}/flavors/detail", self.endpoints.compute);
        let list: FlavorList = self.fetch(self.authed(self.client.get(url))).await?;
        Ok(list.flavors)
    }

    /// Servers whose name matches `name` (Nova treats it as a regex)
    pub async fn list_servers(&self, name: Option<&str>) -> Result<Vec<OsServer>> {
        let url = format!("{}/servers/detail", self.endpoints.compute);
        let mut req = self.compute(self.client.get(url));
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            req = req.query(&[("name", name)]);
        }
        let list: ServerList = self.fetch(req).await?;
        Ok(list.servers)
    }

    pub async fn list_compute_images(&self) -> Result<Vec<OsComputeImage>> {
        let url = format!("{}/images/detail", self.endpoints.compute);
        let list: ComputeImageList = self.fetch(self.authed(self.client.get(url))).await?;
        Ok(list.images)
    }

    /// Image metadata as seen by Nova; empty when the image is gone
    pub async fn get_image_metadata(&self, image_id: &str) -> Result<HashMap<String, String>> {
        let url = format!("{}/images/{}/metadata", self.endpoints.compute, image_id);
        let meta: Option<MetadataResponse> = self.fetch_opt(self.authed(self.client.get(url))).await?;
        Ok(meta.map(|m| m.metadata).unwrap_or_default())
    }

    // --- Image ---

    /// All Glance images, following `next` links
    pub async fn list_images(&self) -> Result<Vec<OsImage>> {
        let mut images = Vec::new();
        let mut url = format!("{}/v2/images", self.endpoints.image);
        loop {
            let page: ImageList = self.fetch(self.authed(self.client.get(&url))).await?;
            images.extend(page.images);
            match page.next {
                Some(next) => url = format!("{}{}", self.endpoints.image, next),
                None => break,
            }
        }
        Ok(images)
    }

    pub async fn get_image(&self, image_id: &str) -> Result<Option<OsImage>> {
        let url = format!("{}/v2/images/{}", self.endpoints.image, image_id);
        self.fetch_opt(self.authed(self.client.get(url))).await
    }

    // --- Network ---

    pub async fn list_floating_ips(&self) -> Result<Vec<OsFloatingIp>> {
        let url = format!("{}/v2.0/floatingips", self.endpoints.network);
        let list: FloatingIpList = self.fetch(self.authed(self.client.get(url))).await?;
        Ok(list.floatingips)
    }

    pub async fn list_networks(&self) -> Result<Vec<OsNetwork>> {
        let url = format!("{}/v2.0/networks", self.endpoints.network);
        let list: NetworkList = self.fetch(self.authed(self.client.get(url))).await?;
        Ok(list.networks)
    }

    // --- Orchestration ---

    fn orchestration(&self) -> Result<&str> {
        self.endpoints
            .orchestration
            .as_deref()
            .ok_or_else(|| NotFoundError::new("service", "orchestration").into())
    }

    pub async fn get_stack(&self, name_or_id: &str) -> Result<Option<OsStack>> {
        let url = format!("{}/stacks/{}", self.orchestration()?, name_or_id);
        let resp: Option<StackResponse> = self.fetch_opt(self.authed(self.client.get(url))).await?;
        Ok(resp.map(|r| r.stack))
    }

    pub async fn create_stack(&self, request: &StackCreate<'_>) -> Result<OsStack> {
        let url = format!("{}/stacks", self.orchestration()?);
        let resp: StackResponse = self.fetch(self.authed(self.client.post(url)).json(request)).await?;
        Ok(resp.stack)
    }
}

/// Pick the endpoint URL per service type for the given interface and region
pub fn resolve_endpoints(catalog: &[CatalogService], interface: &str, region: Option<&str>) -> Result<Endpoints> {
    let find = |service_type: &str| -> Option<String> {
        catalog
            .iter()
            .filter(|s| s.service_type == service_type)
            .flat_map(|s| s.endpoints.iter())
            .find(|e| e.interface == interface && region.map_or(true, |r| e.region.as_deref() == Some(r)))
            .map(|e| e.url.trim_end_matches('/').to_string())
    };
    let require = |service_type: &str| -> Result<String> {
        find(service_type).ok_or_else(|| NotFoundError::new("service", service_type).into())
    };

    Ok(Endpoints {
        compute: require("compute")?,
        image: require("image")?,
        network: require("network")?,
        orchestration: find("orchestration"),
    })
}
