use std::env;
use std::path::PathBuf;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub os_cloud: String,
    pub clouds_file: Option<PathBuf>,
    pub ssh_timeout: u64,
    pub openssl: String,
    pub virsh: String,
    pub neato: String,
    pub ansible_playbook: String,
    pub ansible_roles_path: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            output_dir: PathBuf::from(get_env("NETLAB_OUTPUT_DIR", "output")),
            templates_dir: PathBuf::from(get_env("NETLAB_TEMPLATES_DIR", "templates")),
            os_cloud: get_env("OS_CLOUD", "ops_work"),
            clouds_file: env::var("OS_CLIENT_CONFIG_FILE").ok().map(PathBuf::from),
            ssh_timeout: parse_secs("NETLAB_SSH_TIMEOUT", &get_env("NETLAB_SSH_TIMEOUT", "30"), 30),
            openssl: get_env("NETLAB_OPENSSL", "/usr/bin/openssl"),
            virsh: get_env("NETLAB_VIRSH", "virsh"),
            neato: get_env("NETLAB_NEATO", "neato"),
            ansible_playbook: get_env("NETLAB_ANSIBLE_PLAYBOOK", "ansible-playbook"),
            ansible_roles_path: get_env("ANSIBLE_ROLES_PATH", "~/my_ansible_roles:"),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_secs(key: &str, raw: &str, default: u64) -> u64 {
    match raw.trim().parse() {
        Ok(secs) => secs,
        Err(e) => {
            tracing::warn!("{}={:?} is not a number of seconds ({}), using {}", key, raw, e, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_default() {
        assert_eq!(get_env("NETLAB_TEST_SURELY_UNSET_KEY", "fallback"), "fallback");
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("NETLAB_SSH_TIMEOUT", " 45 ", 30), 45);
        assert_eq!(parse_secs("NETLAB_SSH_TIMEOUT", "30s", 30), 30);
        assert_eq!(parse_secs("NETLAB_SSH_TIMEOUT", "-1", 30), 30);
    }
}
