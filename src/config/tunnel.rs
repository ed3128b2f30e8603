use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

use super::paths;

/// Authentication method requested for the gateway
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// The `none` method: the gateway lets the user in without credentials
    None,
    Password,
    #[serde(alias = "public_key")]
    PublicKey,
}

impl AuthMethod {
    /// SSH wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Password => "password",
            AuthMethod::PublicKey => "publickey",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the gateway's host key is checked during the handshake
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Only keys already present in known_hosts are accepted
    Verify,
    /// Unknown keys are recorded and accepted; changed keys are refused
    #[default]
    #[serde(alias = "tofu")]
    TrustOnFirstUse,
    /// The fingerprint is logged but never checked
    Skip,
}

impl std::fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HostKeyPolicy::Verify => "verify",
            HostKeyPolicy::TrustOnFirstUse => "trust_on_first_use",
            HostKeyPolicy::Skip => "skip",
        };
        f.write_str(label)
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verify" => Ok(HostKeyPolicy::Verify),
            "trust_on_first_use" | "trust-on-first-use" | "tofu" => {
                Ok(HostKeyPolicy::TrustOnFirstUse)
            }
            "skip" => Ok(HostKeyPolicy::Skip),
            other => Err(format!(
                "unknown host key policy '{}' (expected verify, trust_on_first_use or skip)",
                other
            )),
        }
    }
}

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_timeout() -> u64 {
    30
}

fn default_keepalive() -> u64 {
    60
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_grace() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    local: LocalSection,
    gateway: GatewaySection,
    auth: AuthSection,
    destination: DestinationSection,
    #[serde(default)]
    relay: RelaySection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocalSection {
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewaySection {
    address: String,
    #[serde(default = "default_ssh_port")]
    port: u16,
    #[serde(default)]
    host_key_policy: HostKeyPolicy,
    #[serde(default)]
    known_hosts: Option<String>,
    #[serde(default = "default_timeout")]
    connect_timeout_secs: u64,
    #[serde(default = "default_keepalive")]
    keepalive_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthSection {
    method: AuthMethod,
    username: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    passphrase: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationSection {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelaySection {
    #[serde(default = "default_buffer_size")]
    buffer_size: usize,
    #[serde(default = "default_grace")]
    shutdown_grace_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_grace_secs: default_grace(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    #[serde(default)]
    directory: Option<String>,
}

/// Immutable description of one tunnel
#[derive(Debug)]
pub struct TunnelConfig {
    pub local_ip: String,
    pub local_port: u16,
    pub gateway_ip: String,
    pub gateway_port: u16,
    pub username: String,
    /// May be empty
    pub password: SecretString,
    pub private_key_path: Option<PathBuf>,
    pub public_key_path: Option<PathBuf>,
    /// May be empty
    pub passphrase: SecretString,
    /// Resolved by the gateway, never locally
    pub destination_host: String,
    pub destination_port: u16,
    pub auth_method: AuthMethod,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    /// `None` disables keepalives
    pub keepalive_interval: Option<Duration>,
    pub buffer_size: usize,
    pub shutdown_grace: Duration,
    pub log_dir: Option<PathBuf>,
}

impl TunnelConfig {
    /// Build a config with defaults for everything but the endpoints and user
    pub fn new(
        local: (&str, u16),
        gateway: (&str, u16),
        username: &str,
        auth_method: AuthMethod,
        destination: (&str, u16),
    ) -> Self {
        Self {
            local_ip: local.0.to_string(),
            local_port: local.1,
            gateway_ip: gateway.0.to_string(),
            gateway_port: gateway.1,
            username: username.to_string(),
            password: SecretString::from(""),
            private_key_path: None,
            public_key_path: None,
            passphrase: SecretString::from(""),
            destination_host: destination.0.to_string(),
            destination_port: destination.1,
            auth_method,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(default_timeout()),
            keepalive_interval: Some(Duration::from_secs(default_keepalive())),
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_grace: Duration::from_secs(default_grace()),
            log_dir: None,
        }
    }

    /// Load from the default location (`<config dir>/tunnel.toml`)
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::tunnel_file().ok_or(ConfigError::NoConfigPath)?;
        Self::load(&path)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML config text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let config = Self::from_file(file);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Self {
        let expand = |raw: Option<String>| {
            raw.filter(|p| !p.trim().is_empty())
                .map(|p| paths::expand_tilde(p.trim()))
        };

        let keepalive_interval = if file.gateway.keepalive_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(file.gateway.keepalive_interval_secs))
        };

        Self {
            local_ip: file.local.address,
            local_port: file.local.port,
            gateway_ip: file.gateway.address,
            gateway_port: file.gateway.port,
            username: file.auth.username,
            password: SecretString::from(file.auth.password.unwrap_or_default()),
            private_key_path: expand(file.auth.private_key),
            public_key_path: expand(file.auth.public_key),
            passphrase: SecretString::from(file.auth.passphrase.unwrap_or_default()),
            destination_host: file.destination.host,
            destination_port: file.destination.port,
            auth_method: file.auth.method,
            host_key_policy: file.gateway.host_key_policy,
            known_hosts_path: expand(file.gateway.known_hosts),
            connect_timeout: Duration::from_secs(file.gateway.connect_timeout_secs),
            keepalive_interval,
            buffer_size: file.relay.buffer_size,
            shutdown_grace: Duration::from_secs(file.relay.shutdown_grace_secs),
            log_dir: expand(file.logging.directory),
        }
    }

    /// Presence checks, IPv4 syntax of both socket addresses, non-zero ports
    /// and a usable connect timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("local.address", &self.local_ip),
            ("gateway.address", &self.gateway_ip),
            ("auth.username", &self.username),
            ("destination.host", &self.destination_host),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
        }

        for (field, value) in [
            ("local.address", &self.local_ip),
            ("gateway.address", &self.gateway_ip),
        ] {
            if value.trim().parse::<std::net::Ipv4Addr>().is_err() {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("'{}' is not a numeric IPv4 address", value),
                });
            }
        }

        if self.gateway_port == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.port",
                message: "must not be 0".to_string(),
            });
        }
        if self.destination_port == 0 {
            return Err(ConfigError::Invalid {
                field: "destination.port",
                message: "must not be 0".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "gateway.connect_timeout_secs",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "relay.buffer_size",
                message: "must be greater than 0".to_string(),
            });
        }
        if self.local_ip.trim() == self.gateway_ip.trim() && self.local_port == self.gateway_port
        {
            return Err(ConfigError::Invalid {
                field: "local.port",
                message: "local endpoint must differ from the gateway endpoint".to_string(),
            });
        }

        Ok(())
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = password;
        self
    }

    pub fn with_passphrase(mut self, passphrase: SecretString) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn with_key_files(mut self, private_key: PathBuf, public_key: Option<PathBuf>) -> Self {
        self.private_key_path = Some(private_key);
        self.public_key_path = public_key;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_known_hosts(mut self, path: PathBuf) -> Self {
        self.known_hosts_path = Some(path);
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }
}
