//! Admin server configuration
//!
//! The server reads its config from the first `.conf` or `.json` file in a
//! directory (sorted by name), matching how the plugin's own net conf is
//! discovered on a node.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Default listen address of the admin API
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8964";

/// Configuration for the admin server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConf {
    /// Comma-separated etcd endpoints
    #[serde(default)]
    pub etcd_endpoints: String,

    /// Client TLS material for the etcd cluster
    #[serde(default)]
    pub etcd_cert_file: Option<String>,
    #[serde(default)]
    pub etcd_key_file: Option<String>,
    #[serde(default)]
    pub etcd_ca_cert_file: Option<String>,

    /// Listen address for the HTTP API
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Whether the binding list bypasses the namespace filter
    #[serde(default = "default_true")]
    pub admin_role: bool,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

const fn default_true() -> bool {
    true
}

impl AdminConf {
    /// The etcd endpoints split out of the comma-separated field
    #[must_use]
    pub fn endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whether any endpoint requires TLS
    #[must_use]
    pub fn wants_tls(&self) -> bool {
        self.etcd_endpoints.contains("https://")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_list().is_empty() {
            return Err(ConfigError::MissingEndpoints);
        }
        Ok(())
    }
}

/// Load the admin config from the first usable file in `dir`
pub fn load_conf_dir(dir: impl AsRef<Path>) -> Result<AdminConf, ConfigError> {
    let dir = dir.as_ref();
    let mut files = conf_files(dir)?;
    files.sort();

    let Some(path) = files.into_iter().next() else {
        return Err(ConfigError::NoConfigFound {
            dir: dir.display().to_string(),
        });
    };
    load_conf_file(path)
}

/// Load the admin config from an explicit file
pub fn load_conf_file(path: impl AsRef<Path>) -> Result<AdminConf, ConfigError> {
    let path = path.as_ref();
    debug!("loading admin config from {:?}", path);

    let contents = std::fs::read_to_string(path)?;
    let conf: AdminConf = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{e} in {}", path.display())))?;
    conf.validate()?;
    Ok(conf)
}

fn conf_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("conf" | "json") => files.push(path),
            _ => {}
        }
    }
    Ok(files)
}
