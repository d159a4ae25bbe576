use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use super::types::*;

/// Status and decoded body of a dataservice call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// vManage REST client: form login, session cookie and XSRF token
pub struct VManageClient {
    base_url: String,
    client: Client,
    token: Option<String>,
}

impl VManageClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_token(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.header("X-XSRF-TOKEN", token),
            None => req,
        }
    }

    /// Log in through j_security_check and fetch the XSRF token.
    /// vManage answers a bad login with its HTML login page.
    pub async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let login_url = self.url("/j_security_check");
        tracing::info!("Connect to url: {}", login_url);
        let resp = self
            .client
            .post(&login_url)
            .form(&[("j_username", user), ("j_password", pass)])
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", login_url))?;
        let body = resp.text().await.unwrap_or_default();
        if body.contains("<html>") {
            bail!("vManage login failed for user {}", user);
        }

        let resp = self.client.get(self.url("/dataservice/client/token")).send().await?;
        let status = resp.status();
        let token = resp.text().await.unwrap_or_default();
        if status != StatusCode::OK || token.contains("<html>") {
            bail!("vManage login token failed: {}", status);
        }
        self.token = Some(token.trim().to_string());
        tracing::info!("Token of session saved");
        Ok(())
    }

    /// GET or POST a dataservice path. The outcome is logged, never turned into an error
    /// so callers decide which failures are fatal.
    pub async fn http_request(&self, path: &str, method: Method, body: Option<String>) -> Result<ApiResponse> {
        let url = self.url(path);
        tracing::debug!("device url: {}", url);
        let req = if method == Method::GET {
            self.client.get(&url)
        } else if method == Method::POST {
            self.client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.unwrap_or_default())
        } else {
            bail!("Unsupported method {} for {}", method, path);
        };

        let resp = self.with_token(req).send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if status == StatusCode::OK {
            tracing::debug!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            tracing::info!("HTTP request to vManage successful: {}", path);
        } else {
            if let Some(details) = body.pointer("/error/details") {
                tracing::error!("{}", details);
            }
            tracing::error!("HTTP request to vManage failed {}: {}", status, path);
        }
        Ok(ApiResponse { status, body })
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let resp = self.http_request(path, Method::GET, None).await?;
        if !resp.is_ok() {
            return Err(anyhow!("vManage API error {}: {}", resp.status, resp.body));
        }
        let list: DataList<T> =
            serde_json::from_value(resp.body).with_context(|| format!("Unexpected response from {}", path))?;
        Ok(list.data)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let resp = self
            .http_request(path, Method::POST, Some(serde_json::to_string(body)?))
            .await?;
        if !resp.is_ok() {
            return Err(anyhow!("vManage API error {}: {}", resp.status, resp.body));
        }
        Ok(resp)
    }

    // --- Settings ---

    async fn get_setting(&self, name: &str) -> Result<Value> {
        let data: Vec<Value> = self
            .get_data(&format!("/dataservice/settings/configuration/{}", name))
            .await?;
        Ok(data.into_iter().next().unwrap_or(Value::Null))
    }

    pub async fn get_org(&self) -> Result<String> {
        let setting = self.get_setting("organization").await?;
        Ok(setting["org"].as_str().unwrap_or_default().to_string())
    }

    pub async fn set_org(&self, org: &str) -> Result<()> {
        self.post_json("/dataservice/settings/configuration/organization", &json!({ "org": org }))
            .await?;
        Ok(())
    }

    pub async fn get_ca_type(&self) -> Result<String> {
        let setting = self.get_setting("certificate").await?;
        Ok(setting["certificateSigning"].as_str().unwrap_or_default().to_string())
    }

    pub async fn set_ca_type(&self, ca_type: &str) -> Result<()> {
        self.post_json(
            "/dataservice/settings/configuration/certificate",
            &json!({ "certificateSigning": ca_type }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_root_cert(&self, pem: &str) -> Result<()> {
        self.post_json(
            "/dataservice/settings/configuration/certificate/enterpriserootca",
            &json!({ "enterpriseRootCA": pem }),
        )
        .await?;
        Ok(())
    }

    pub async fn get_vbond(&self) -> Result<String> {
        let setting = self.get_setting("device").await?;
        Ok(setting["domainIp"].as_str().unwrap_or_default().to_string())
    }

    pub async fn set_vbond(&self, ip: &str) -> Result<()> {
        self.post_json(
            "/dataservice/settings/configuration/device",
            &json!({ "domainIp": ip, "port": "12346" }),
        )
        .await?;
        Ok(())
    }

    // --- Certificates ---

    pub async fn generate_csr(&self, device_ip: &str) -> Result<String> {
        let resp = self
            .post_json("/dataservice/certificate/generate/csr", &json!({ "deviceIP": device_ip }))
            .await?;
        resp.body
            .pointer("/data/0/deviceCSR")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("vManage returned no CSR for {}", device_ip))
    }

    pub async fn install_device_cert(&self, pem: &str) -> Result<Value> {
        let resp = self
            .post_json("/dataservice/certificate/install/signedCert", &json!({ "cert": pem }))
            .await?;
        Ok(resp.body)
    }

    pub async fn push_certificates(&self) -> Result<Value> {
        let resp = self
            .post_json("/dataservice/certificate/vedge/list?action=push", &json!({}))
            .await?;
        Ok(resp.body)
    }

    // --- Devices ---

    pub async fn get_device_list(&self, kind: &str) -> Result<Vec<VmDevice>> {
        self.get_data(&format!("/dataservice/system/device/{}", kind)).await
    }

    pub async fn add_controller(&self, device: &ControllerAdd<'_>) -> Result<ApiResponse> {
        self.http_request("/dataservice/system/device", Method::POST, Some(serde_json::to_string(device)?))
            .await
    }

    /// Ask vManage to push the root certificate chain; anything but 200 is an error
    pub async fn sync_root_cert(&self) -> Result<()> {
        let resp = self
            .http_request("/dataservice/system/device/sync/rootcertchain", Method::GET, None)
            .await?;
        if !resp.is_ok() {
            bail!("Failed to sync root certificate: {}", resp.status);
        }
        Ok(())
    }

    pub async fn get_bootstrap(&self, uuid: &str) -> Result<ApiResponse> {
        self.http_request(
            &format!("/dataservice/system/device/bootstrap/device/{}?configtype=cloudinit", uuid),
            Method::GET,
            None,
        )
        .await
    }

    /// Upload a signed serial file (vEdge licence list)
    pub async fn upload_serial_file(&self, path: &Path) -> Result<Value> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read serial file {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "serialFile.viptela".to_string());
        let form = Form::new()
            .text("validity", "valid")
            .text("upload", "true")
            .part("file", Part::bytes(content).file_name(file_name));

        let resp = self
            .with_token(self.client.post(self.url("/dataservice/system/device/fileupload")))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("vManage API error {}: {}", status, body));
        }
        Ok(resp.json().await.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Accept any login and hand out token "xsrf-1"
    pub(crate) async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/j_security_check"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dataservice/client/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("xsrf-1"))
            .mount(server)
            .await;
    }

    pub(crate) async fn logged_in(server: &MockServer) -> VManageClient {
        mount_login(server).await;
        let mut client = VManageClient::new(&server.uri()).unwrap();
        client.login("admin", "admin").await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_login_sends_form_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/j_security_check"))
            .and(body_string_contains("j_username=admin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dataservice/client/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("xsrf-1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dataservice/settings/configuration/organization"))
            .and(header("X-XSRF-TOKEN", "xsrf-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [{ "org": "lab-org" }] })))
            .mount(&server)
            .await;

        let mut client = VManageClient::new(&server.uri()).unwrap();
        client.login("admin", "secret").await.unwrap();
        assert_eq!(client.get_org().await.unwrap(), "lab-org");
    }

    #[tokio::test]
    async fn test_login_page_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/j_security_check"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>login</body></html>"))
            .mount(&server)
            .await;

        let mut client = VManageClient::new(&server.uri()).unwrap();
        let err = client.login("admin", "bad").await.unwrap_err();
        assert!(err.to_string().contains("login failed"));
    }

    #[tokio::test]
    async fn test_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/j_security_check"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dataservice/client/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let mut client = VManageClient::new(&server.uri()).unwrap();
        assert!(client.login("admin", "admin").await.is_err());
    }

    #[tokio::test]
    async fn test_generate_csr_and_settings() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/dataservice/certificate/generate/csr"))
            .and(body_json(json!({ "deviceIP": "10.10.0.1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "deviceCSR": "-----BEGIN CERTIFICATE REQUEST-----" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dataservice/settings/configuration/device"))
            .and(body_json(json!({ "domainIp": "10.10.0.3", "port": "12346" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(
            client.generate_csr("10.10.0.1").await.unwrap(),
            "-----BEGIN CERTIFICATE REQUEST-----"
        );
        client.set_vbond("10.10.0.3").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_request_logs_failure_without_error() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/dataservice/template/feature/"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "Bad request", "details": "Template name exists" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dataservice/system/device/sync/rootcertchain"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resp = client
            .http_request("/dataservice/template/feature/", Method::POST, Some("{}".into()))
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body["error"]["details"], "Template name exists");
        assert!(client.http_request("/x", Method::PUT, None).await.is_err());
        assert!(client.sync_root_cert().await.is_err());
    }

    #[tokio::test]
    async fn test_bootstrap_query() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/dataservice/system/device/bootstrap/device/uuid-1"))
            .and(query_param("configtype", "cloudinit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bootstrapConfig": "#cloud-config" })))
            .mount(&server)
            .await;

        assert!(client.get_bootstrap("uuid-1").await.unwrap().is_ok());
    }
}
