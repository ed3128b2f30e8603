//! Command-line surface of the `sshfwd` binary.

use std::path::PathBuf;

use clap::Parser;
use secrecy::SecretString;

use crate::config::{HostKeyPolicy, TunnelConfig};
use crate::error::ConfigError;

/// Forward a local TCP port to a destination behind an SSH gateway
#[derive(Parser, Debug)]
#[command(name = "sshfwd")]
#[command(version)]
#[command(long_about = r#"
sshfwd opens one authenticated SSH session to a gateway, listens on a local
port, and forwards every accepted connection through a direct-tcpip channel
to a destination reachable from the gateway.

EXAMPLES:
  # Use <config dir>/tunnel.toml
  sshfwd

  # Explicit config, password from the environment
  SSHFWD_PASSWORD=... sshfwd --config ./db-tunnel.toml

ENVIRONMENT VARIABLES:
  SSHFWD_PASSWORD    Password for password authentication
  SSHFWD_PASSPHRASE  Passphrase of the private key
  SSHFWD_LOG_DIR     Directory for the daily log file
  RUST_LOG           Log filter (default: info)
"#)]
pub struct Cli {
    /// Tunnel configuration file (TOML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Password, overriding the config file
    #[arg(long, env = "SSHFWD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key passphrase, overriding the config file
    #[arg(long, env = "SSHFWD_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// verify, trust_on_first_use or skip
    #[arg(long)]
    pub host_key_policy: Option<HostKeyPolicy>,

    /// known_hosts file to use instead of the default locations
    #[arg(long)]
    pub known_hosts: Option<PathBuf>,

    /// Directory for the daily log file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Load the config file and apply command-line overrides
    pub fn load_config(&self) -> Result<TunnelConfig, ConfigError> {
        let config = match &self.config {
            Some(path) => TunnelConfig::load(path)?,
            None => TunnelConfig::load_default()?,
        };
        Ok(self.apply(config))
    }

    /// Command-line values win over the file
    pub fn apply(&self, mut config: TunnelConfig) -> TunnelConfig {
        if let Some(password) = &self.password {
            config = config.with_password(SecretString::from(password.clone()));
        }
        if let Some(passphrase) = &self.passphrase {
            config = config.with_passphrase(SecretString::from(passphrase.clone()));
        }
        if let Some(policy) = self.host_key_policy {
            config = config.with_host_key_policy(policy);
        }
        if let Some(path) = &self.known_hosts {
            config = config.with_known_hosts(path.clone());
        }
        if let Some(dir) = &self.log_dir {
            config = config.with_log_dir(dir.clone());
        }
        config
    }
}
