//! OpenSSH known_hosts lookup and learning.
//!
//! Keys are searched in the sshfwd file first and then in the user's
//! `~/.ssh/known_hosts`, which is never written to. Supported syntax:
//! comma-separated host lists, `[host]:port` names, `!` negation, `*`/`?`
//! wildcards, hashed `|1|` names and the `@revoked` marker.

use std::path::{Path, PathBuf};

use russh::keys::{self, HashAlg, PublicKey};

use crate::config::paths;
use crate::error::TunnelError;

mod entries;
mod patterns;

use entries::HostEntries;
use patterns::HostName;

/// Result of checking a host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// Key matches a stored key
    Known,
    /// No key stored for this host
    Unknown {
        fingerprint: String,
        key_type: String,
    },
    /// A different key of the same type is stored (possible MITM)
    Changed {
        old_fingerprint: String,
        new_fingerprint: String,
        key_type: String,
    },
    /// Key matches a revoked entry
    Revoked { fingerprint: String },
}

/// Set of known_hosts files consulted for one tunnel
#[derive(Debug, Clone)]
pub struct KnownHosts {
    search: Vec<PathBuf>,
    record_to: Option<PathBuf>,
}

impl KnownHosts {
    /// sshfwd's own file, falling back to `~/.ssh/known_hosts` for lookups
    pub fn from_default_locations() -> Self {
        Self::with_paths(paths::known_hosts_file(), paths::ssh_known_hosts_file())
    }

    /// Explicit primary (read and written) and fallback (read only) files
    pub fn with_paths(primary: Option<PathBuf>, fallback: Option<PathBuf>) -> Self {
        let mut search = Vec::new();
        search.extend(primary.clone());
        if let Some(fallback) = fallback {
            if primary.as_ref() != Some(&fallback) {
                search.push(fallback);
            }
        }
        Self {
            search,
            record_to: primary,
        }
    }

    /// Use exactly one file, or the default locations when none is configured
    pub fn for_config(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::with_paths(Some(path.to_path_buf()), None),
            None => Self::from_default_locations(),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search
    }

    /// SHA-256 fingerprint in OpenSSH notation
    pub fn fingerprint(key: &PublicKey) -> String {
        key.fingerprint(HashAlg::Sha256).to_string()
    }

    fn entries_for(&self, host: &str, port: u16) -> HostEntries {
        let name = HostName::new(host, port);
        let mut found = HostEntries::default();
        for path in &self.search {
            match entries::read_entries(path) {
                Ok(entries) => found.absorb(entries, &name),
                Err(e) => tracing::debug!("Cannot read known_hosts {}: {}", path.display(), e),
            }
        }
        found
    }

    /// Classify the key presented by `host:port`
    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
        let found = self.entries_for(host, port);
        let fingerprint = Self::fingerprint(key);
        let key_type = key.algorithm().as_str().to_string();
        let same = |stored: &PublicKey| stored.key_data() == key.key_data();

        if found.revoked.iter().any(same) {
            return HostKeyStatus::Revoked { fingerprint };
        }
        if found.trusted.iter().any(same) {
            return HostKeyStatus::Known;
        }

        match found
            .trusted
            .iter()
            .find(|stored| stored.algorithm() == key.algorithm())
        {
            Some(previous) => HostKeyStatus::Changed {
                old_fingerprint: Self::fingerprint(previous),
                new_fingerprint: fingerprint,
                key_type,
            },
            None => HostKeyStatus::Unknown {
                fingerprint,
                key_type,
            },
        }
    }

    /// Append the key to the primary file, returning the file written
    pub fn learn(&self, host: &str, port: u16, key: &PublicKey) -> Result<PathBuf, TunnelError> {
        let rejected = |reason: String| TunnelError::HostKeyRejected {
            host: host.to_string(),
            port,
            reason,
        };

        let path = self
            .record_to
            .clone()
            .ok_or_else(|| rejected("no known_hosts file to record the key in".to_string()))?;

        paths::ensure_parent_dir(&path)
            .map_err(|e| rejected(format!("cannot create {}: {}", path.display(), e)))?;

        keys::known_hosts::learn_known_hosts_path(host, port, key, &path)
            .map_err(|e| rejected(format!("cannot write {}: {}", path.display(), e)))?;

        Ok(path)
    }
}
