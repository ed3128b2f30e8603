use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::MethodKind;
use russh::keys::{HashAlg, PrivateKey, PrivateKeyWithHashAlg};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AuthMethod, TunnelConfig, paths};
use crate::error::TunnelError;

/// What the tunnel presents to the gateway: the user and exactly one method
#[derive(Clone)]
pub struct Credentials {
    username: String,
    method: AuthMethod,
    password: SecretString,
    private_key: Option<PathBuf>,
    public_key: Option<PathBuf>,
    passphrase: SecretString,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("method", &self.method)
            .field("password", &"[REDACTED]")
            .field("private_key", &self.private_key)
            .field("public_key", &self.public_key)
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn none(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            method: AuthMethod::None,
            password: SecretString::from(""),
            private_key: None,
            public_key: None,
            passphrase: SecretString::from(""),
        }
    }

    pub fn password(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            method: AuthMethod::Password,
            password,
            ..Self::none(username)
        }
    }

    /// Key pair authentication. Without a private key path the default
    /// identity files in `~/.ssh` are tried.
    pub fn public_key(
        username: impl Into<String>,
        private_key: Option<PathBuf>,
        public_key: Option<PathBuf>,
        passphrase: SecretString,
    ) -> Self {
        Self {
            method: AuthMethod::PublicKey,
            private_key,
            public_key,
            passphrase,
            ..Self::none(username)
        }
    }

    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            username: config.username.clone(),
            method: config.auth_method,
            password: config.password.clone(),
            private_key: config.private_key_path.clone(),
            public_key: config.public_key_path.clone(),
            passphrase: config.passphrase.clone(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// Load whatever the selected method needs before anything is sent
    pub(crate) fn resolve(&self) -> Result<ResolvedAuth, TunnelError> {
        match self.method {
            AuthMethod::None => Ok(ResolvedAuth::None),
            AuthMethod::Password => Ok(ResolvedAuth::Password(self.password.clone())),
            AuthMethod::PublicKey => {
                let path = self
                    .private_key
                    .clone()
                    .or_else(find_default_key)
                    .ok_or_else(|| TunnelError::KeyFile("No SSH private key found".to_string()))?;
                let path = paths::expand_tilde(&path.to_string_lossy());

                let passphrase = self.passphrase.expose_secret();
                let passphrase = (!passphrase.is_empty()).then_some(passphrase);
                let key = load_private_key(&path, passphrase)?;

                if let Some(public) = &self.public_key {
                    let public = paths::expand_tilde(&public.to_string_lossy());
                    check_key_pair(&key, &public)?;
                }

                Ok(ResolvedAuth::PublicKey(with_signature_hash(key)))
            }
        }
    }
}

/// Credentials ready to be submitted
pub(crate) enum ResolvedAuth {
    None,
    Password(SecretString),
    PublicKey(PrivateKeyWithHashAlg),
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedAuth::None => f.write_str("None"),
            ResolvedAuth::Password(_) => f.debug_tuple("Password").field(&"[REDACTED]").finish(),
            ResolvedAuth::PublicKey(_) => f.debug_tuple("PublicKey").field(&"[KEY]").finish(),
        }
    }
}

/// The SSH method name a configured method is advertised under
pub fn method_kind(method: AuthMethod) -> MethodKind {
    match method {
        AuthMethod::None => MethodKind::None,
        AuthMethod::Password => MethodKind::Password,
        AuthMethod::PublicKey => MethodKind::PublicKey,
    }
}

/// Comma-separated method names, `none` for an empty list
pub fn describe_methods(methods: &[MethodKind]) -> String {
    if methods.is_empty() {
        return "none".to_string();
    }
    methods
        .iter()
        .map(|method| {
            let label: &'static str = method.into();
            label
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Find the first available default SSH key
fn find_default_key() -> Option<PathBuf> {
    paths::default_identity_files()
        .into_iter()
        .find(|path| path.exists())
}

/// RSA keys sign with SHA-512; other algorithms use their native hash
fn with_signature_hash(key: PrivateKey) -> PrivateKeyWithHashAlg {
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };
    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg)
}

/// Load an SSH private key from file
pub(crate) fn load_private_key(
    path: &Path,
    passphrase: Option<&str>,
) -> Result<PrivateKey, TunnelError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TunnelError::KeyFile(format!("Cannot read key file {}: {}", path.display(), e))
    })?;

    // A public key where the private one belongs is a common mistake
    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(TunnelError::KeyFile(format!(
            "File {} contains a PUBLIC key, not a private key",
            path.display()
        )));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(TunnelError::KeyFile(format!(
            "File {} does not appear to be a valid SSH private key",
            path.display()
        )));
    }

    russh::keys::load_secret_key(path, passphrase).map_err(|e| {
        let normalized = e.to_string().to_lowercase();
        let passphrase_problem = normalized.contains("encrypted")
            || normalized.contains("passphrase")
            || normalized.contains("cryptographic");
        if !passphrase_problem {
            TunnelError::KeyFile(format!("Failed to load key {}: {}", path.display(), e))
        } else if passphrase.is_some() {
            TunnelError::KeyFile(format!("Wrong passphrase for key {}", path.display()))
        } else {
            TunnelError::KeyFile(format!("Key {} requires a passphrase", path.display()))
        }
    })
}

/// Reject a private key that does not belong to the configured public key
pub(crate) fn check_key_pair(private: &PrivateKey, public_path: &Path) -> Result<(), TunnelError> {
    let public = russh::keys::load_public_key(public_path).map_err(|e| {
        TunnelError::KeyFile(format!(
            "Cannot load public key {}: {}",
            public_path.display(),
            e
        ))
    })?;

    if private.public_key().key_data() != public.key_data() {
        return Err(TunnelError::KeyFile(format!(
            "Private key does not match public key {}",
            public_path.display()
        )));
    }
    Ok(())
}
