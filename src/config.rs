// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Configuration — /etc/wolfhost/config.toml
//!
//! Every key is optional. A missing file means all defaults; command-line
//! flags are applied on top in `main`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wolfhost/config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Docker socket path; unset means DOCKER_HOST or /var/run/docker.sock
    pub docker_socket: Option<String>,
    /// Try systemd over D-Bus before falling back to systemctl
    pub use_dbus: bool,
    /// Host journal directory, passed to journalctl when it holds machine journals
    pub journal_dir: Option<PathBuf>,
    pub command_timeout_secs: u64,
    pub enablement_timeout_secs: u64,
    pub session_hours: u64,
    /// Static bearer token for scripted access, in addition to login sessions
    pub api_token: Option<String>,
    /// Accounts allowed to log in; empty allows any account in /etc/shadow
    pub allowed_users: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8554,
            tls_cert: None,
            tls_key: None,
            docker_socket: None,
            use_dbus: true,
            journal_dir: Some(PathBuf::from("/var/log/journal")),
            command_timeout_secs: 30,
            enablement_timeout_secs: 5,
            session_hours: 8,
            api_token: None,
            allowed_users: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(format!("Cannot read {}: {}", path.display(), e)),
        };
        let config: Self = toml::from_str(&content)
            .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
        if config.api_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(format!("Invalid config {}: api_token is empty", path.display()));
        }
        Ok(config)
    }
}
