//! Wallet configuration
//!
//! Loaded from a TOML file with `[ledger]`, `[auth]` and `[session]` tables.
//! Every field has a default, so an empty file is a valid configuration.

use anyhow::{bail, Context, Result};
use cult_connection::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Default configuration file name inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub ledger: ConnectionConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// Signing backend and handshake tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the signing backend, including any `/api` prefix
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lifetime of a sign request
    #[serde(default = "default_payload_expiry_secs")]
    pub payload_expiry_secs: u64,

    /// Consecutive status failures before giving up
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,

    #[serde(default = "default_max_poll_rounds")]
    pub max_poll_rounds: u32,

    /// Where the signer app sends the user afterwards
    #[serde(default)]
    pub return_url: Option<String>,

    /// How long to wait for the signer app to take a deep link
    #[serde(default = "default_app_detect_ms")]
    pub app_detect_ms: u64,
}

fn default_backend_url() -> String {
    "http://localhost:4000/api".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_payload_expiry_secs() -> u64 {
    600
}

fn default_max_poll_errors() -> u32 {
    3
}

fn default_max_poll_rounds() -> u32 {
    300
}

fn default_app_detect_ms() -> u64 {
    3000
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            poll_interval_ms: default_poll_interval_ms(),
            payload_expiry_secs: default_payload_expiry_secs(),
            max_poll_errors: default_max_poll_errors(),
            max_poll_rounds: default_max_poll_rounds(),
            return_url: None,
            app_detect_ms: default_app_detect_ms(),
        }
    }
}

impl AuthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn payload_expiry(&self) -> Duration {
        Duration::from_secs(self.payload_expiry_secs)
    }

    pub fn app_detect(&self) -> Duration {
        Duration::from_millis(self.app_detect_ms)
    }

    /// Payload lifetime rounded up to whole minutes.
    pub fn expire_minutes(&self) -> u64 {
        self.payload_expiry_secs.div_ceil(60).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Defaults to `~/.cult-wallet`
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_max_age_secs() -> u64 {
    24 * 60 * 60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            data_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".cult-wallet"))
        .unwrap_or_else(|| PathBuf::from(".cult-wallet"))
}

impl WalletConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: WalletConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = default_data_dir().join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Replace the endpoint list with a comma separated override.
    pub fn override_endpoints(&mut self, list: &str) {
        self.ledger.endpoints = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.endpoints.is_empty() {
            bail!("At least one ledger endpoint must be specified");
        }
        for endpoint in &self.ledger.endpoints {
            if !(endpoint.starts_with("wss://") || endpoint.starts_with("ws://")) {
                bail!("Ledger endpoint {} must be a ws:// or wss:// URL", endpoint);
            }
        }
        if self.ledger.connect_attempts == 0 {
            bail!("ledger.connect_attempts must be at least 1");
        }
        if self.ledger.backoff_base_ms > self.ledger.backoff_cap_ms {
            bail!("ledger.backoff_base_ms must not exceed ledger.backoff_cap_ms");
        }

        if !(self.auth.backend_url.starts_with("http://")
            || self.auth.backend_url.starts_with("https://"))
        {
            bail!("auth.backend_url must be an http:// or https:// URL");
        }
        if self.auth.poll_interval_ms == 0 {
            bail!("auth.poll_interval_ms must be positive");
        }
        if self.auth.max_poll_errors == 0 {
            bail!("auth.max_poll_errors must be at least 1");
        }
        if self.auth.payload_expiry_secs == 0 {
            bail!("auth.payload_expiry_secs must be positive");
        }

        let poll_budget = self.auth.poll_interval() * self.auth.max_poll_rounds;
        if poll_budget < self.auth.payload_expiry() {
            tracing::warn!(
                "Polling gives up after {:?}, before sign requests expire ({:?})",
                poll_budget,
                self.auth.payload_expiry()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = WalletConfig::default();
        assert_eq!(config.ledger.connect_timeout_secs, 15);
        assert_eq!(config.auth.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.auth.payload_expiry(), Duration::from_secs(600));
        assert_eq!(config.auth.expire_minutes(), 10);
        assert_eq!(config.auth.max_poll_errors, 3);
        assert_eq!(config.session.max_age(), Duration::from_secs(86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: WalletConfig = toml::from_str(
            r#"
            [ledger]
            endpoints = ["wss://s1.example.net"]
            max_retries = 4

            [auth]
            backend_url = "https://signer.example.net/api"
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger.endpoints, vec!["wss://s1.example.net"]);
        assert_eq!(config.ledger.max_retries, 4);
        assert_eq!(config.ledger.cooldown_secs, 300);
        assert_eq!(config.auth.backend_url, "https://signer.example.net/api");
        assert_eq!(config.auth.app_detect_ms, 3000);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nmax_age_secs = 60").unwrap();

        let config = WalletConfig::from_file(file.path()).unwrap();
        assert_eq!(config.session.max_age_secs, 60);
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = WalletConfig::default();
        config.ledger.endpoints = vec!["https://not-a-socket".to_string()];
        assert!(config.validate().is_err());

        config.ledger.endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_poll_errors() {
        let mut config = WalletConfig::default();
        config.auth.max_poll_errors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_endpoints() {
        let mut config = WalletConfig::default();
        config.override_endpoints(" wss://a , wss://b,,");
        assert_eq!(config.ledger.endpoints, vec!["wss://a", "wss://b"]);
    }
}
