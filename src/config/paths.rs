use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "sshfwd", "sshfwd")
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

/// Get the path to the default tunnel config file
pub fn tunnel_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("tunnel.toml"))
}

/// Get the path to the sshfwd known_hosts file
pub fn known_hosts_file() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("known_hosts"))
}

/// Get the path to the user's SSH known_hosts file
pub fn ssh_known_hosts_file() -> Option<PathBuf> {
    ssh_dir().map(|dir| dir.join("known_hosts"))
}

/// Create the parent directory of `path` with owner-only permissions
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Expand tilde in path (e.g., ~/.ssh/id_rsa -> /home/user/.ssh/id_rsa)
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Get the user's home directory
fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .or_else(|| std::env::var("HOME").ok().map(PathBuf::from))
}

/// Get the default SSH directory
pub fn ssh_dir() -> Option<PathBuf> {
    dirs_home().map(|home| home.join(".ssh"))
}

/// Get the default SSH identity files to try
pub fn default_identity_files() -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(ssh_dir) = ssh_dir() {
        files.push(ssh_dir.join("id_ed25519"));
        files.push(ssh_dir.join("id_rsa"));
        files.push(ssh_dir.join("id_ecdsa"));
    }
    files
}

/// Get the log directory path, honouring `SSHFWD_LOG_DIR`
pub fn log_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("SSHFWD_LOG_DIR") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        return Some(PathBuf::from(trimmed));
    }

    config_dir().map(|d| d.join("logs"))
}

/// Ensure a log directory exists with proper permissions
pub fn ensure_log_dir(dir: &Path) -> std::io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    Ok(dir.to_path_buf())
}
