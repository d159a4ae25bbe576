use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const ROOTCA_CERT: &str = "CA.crt";
pub const ROOTCA_KEY: &str = "CA.key";
const CERT_DAYS: &str = "2000";
const ROOTCA_SUBJECT: &str = "/C=RU/ST=MS/L=MS/O=viptela sdwan/CN=SD-WAN";

/// Enterprise root CA kept in `cert_path`, driven through the openssl binary
#[derive(Debug, Clone)]
pub struct Pki {
    program: String,
    cert_path: PathBuf,
}

impl Pki {
    pub fn new(program: &str, cert_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.to_string(),
            cert_path: cert_path.into(),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn rootca_cert(&self) -> PathBuf {
        self.cert_path.join(ROOTCA_CERT)
    }

    pub fn rootca_key(&self) -> PathBuf {
        self.cert_path.join(ROOTCA_KEY)
    }

    pub fn csr_file(&self, name: &str) -> PathBuf {
        self.cert_path.join(format!("{}.csr", name))
    }

    pub fn crt_file(&self, name: &str) -> PathBuf {
        self.cert_path.join(format!("{}.crt", name))
    }

    fn genrsa_args(&self) -> Vec<String> {
        vec![
            "genrsa".into(),
            "-out".into(),
            self.rootca_key().display().to_string(),
            "2048".into(),
        ]
    }

    fn rootca_args(&self) -> Vec<String> {
        vec![
            "req".into(),
            "-x509".into(),
            "-new".into(),
            "-nodes".into(),
            "-key".into(),
            self.rootca_key().display().to_string(),
            "-sha256".into(),
            "-days".into(),
            CERT_DAYS.into(),
            "-subj".into(),
            ROOTCA_SUBJECT.into(),
            "-out".into(),
            self.rootca_cert().display().to_string(),
        ]
    }

    fn sign_args(&self, name: &str) -> Vec<String> {
        vec![
            "x509".into(),
            "-req".into(),
            "-in".into(),
            self.csr_file(name).display().to_string(),
            "-CA".into(),
            self.rootca_cert().display().to_string(),
            "-CAkey".into(),
            self.rootca_key().display().to_string(),
            "-CAcreateserial".into(),
            "-out".into(),
            self.crt_file(name).display().to_string(),
            "-days".into(),
            CERT_DAYS.into(),
            "-sha256".into(),
        ]
    }

    async fn openssl(&self, args: &[String]) -> Result<()> {
        tracing::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", self.program))?;
        if !output.status.success() {
            bail!(
                "{} {} failed: {}",
                self.program,
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// New RSA key and self-signed root certificate
    pub async fn generate_rootca(&self) -> Result<()> {
        tracing::info!("Generate Root Certificate");
        tokio::fs::create_dir_all(&self.cert_path)
            .await
            .with_context(|| format!("Failed to create {}", self.cert_path.display()))?;
        self.openssl(&self.genrsa_args()).await?;
        self.openssl(&self.rootca_args()).await
    }

    /// Store a CSR as `<name>.csr`, sign it with the root CA and return the certificate PEM
    pub async fn sign_csr(&self, name: &str, csr: &str) -> Result<String> {
        let csr_file = self.csr_file(name);
        tokio::fs::write(&csr_file, csr)
            .await
            .with_context(|| format!("Failed to write {}", csr_file.display()))?;
        self.openssl(&self.sign_args(name)).await?;

        let crt_file = self.crt_file(name);
        tracing::info!("Write CRT to file {}", crt_file.display());
        tokio::fs::read_to_string(&crt_file)
            .await
            .map_err(|e| anyhow!("Signed certificate {} unreadable: {}", crt_file.display(), e))
    }

    pub async fn read_rootca(&self) -> Result<String> {
        let path = self.rootca_cert();
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read root certificate {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rootca_args() {
        let pki = Pki::new("openssl", "certs");
        assert_eq!(pki.genrsa_args(), ["genrsa", "-out", "certs/CA.key", "2048"]);
        let args = pki.rootca_args();
        assert_eq!(&args[..3], ["req", "-x509", "-new"]);
        let subj = args.iter().position(|a| a == "-subj").unwrap();
        assert_eq!(args[subj + 1], "/C=RU/ST=MS/L=MS/O=viptela sdwan/CN=SD-WAN");
        assert_eq!(args.last().unwrap(), "certs/CA.crt");
    }

    #[test]
    fn test_sign_args() {
        let args = Pki::new("openssl", "certs").sign_args("vsmart");
        assert_eq!(args[3], "certs/vsmart.csr");
        assert!(args.contains(&"-CAcreateserial".to_string()));
        assert!(args.contains(&"certs/vsmart.crt".to_string()));
    }

    #[tokio::test]
    async fn test_sign_csr_runs_program() {
        let dir = tempfile::tempdir().unwrap();
        let pki = Pki::new("true", dir.path());
        std::fs::write(pki.crt_file("vbond"), "-----BEGIN CERTIFICATE-----\n").unwrap();
        let crt = pki.sign_csr("vbond", "-----BEGIN CERTIFICATE REQUEST-----\n").await.unwrap();
        assert!(crt.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(pki.csr_file("vbond").exists());

        assert!(Pki::new("false", dir.path()).generate_rootca().await.is_err());
    }
}
