use anyhow::anyhow;
use dirs::home_dir;

use crate::resolution::{CategoryClient, UdpExchanger};

use serde::{Deserialize, Serialize};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ConfigToml {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub upstream: Upstream,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub categories: Categories,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct General {
    /// Address the proxy listens on for DNS queries.
    #[serde(default = "default_socket")]
    pub socket: SocketAddr,

    #[serde(default = "default_false")]
    pub verbose: bool,
}

impl Default for General {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            verbose: default_false(),
        }
    }
}

fn default_socket() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5053))
}

fn default_false() -> bool {
    false
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Upstream {
    /// Resolver every cache miss is forwarded to.
    #[serde(default = "default_forward")]
    pub forward: SocketAddr,

    #[serde(default = "default_upstream_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_upstream_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Upstream {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            forward: default_forward(),
            read_timeout_ms: default_upstream_timeout_ms(),
            write_timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

fn default_forward() -> SocketAddr {
    SocketAddr::from(([1, 0, 0, 1], 53))
}

fn default_upstream_timeout_ms() -> u64 {
    UdpExchanger::DEFAULT_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Cache {
    /// Maximum number of cached responses.
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// Upper bound of the lifetime of a cache entry in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl: u32,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            default_ttl: default_ttl(),
        }
    }
}

fn default_cache_size() -> usize {
    1024
}

fn default_ttl() -> u32 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Categories {
    /// Base url of the category service. The client ip is appended as last path segment.
    #[serde(default = "default_categories_url")]
    pub url: String,

    #[serde(default = "default_categories_timeout_ms")]
    pub timeout_ms: u64,
}

impl Categories {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for Categories {
    fn default() -> Self {
        Self {
            url: default_categories_url(),
            timeout_ms: default_categories_timeout_ms(),
        }
    }
}

fn default_categories_url() -> String {
    "http://localhost:8080/categories".to_string()
}

fn default_categories_timeout_ms() -> u64 {
    CategoryClient::DEFAULT_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Metrics {
    /// Serve prometheus metrics on `http://{socket}/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_socket")]
    pub socket: SocketAddr,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            socket: default_metrics_socket(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_socket() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}

impl ConfigToml {
    /// Default config with every value commented out.
    pub fn commented_out_sample() -> Result<String, toml::ser::Error> {
        let full_config = toml::to_string(&Self::default())?;
        let commented_out: Vec<String> = full_config
            .split('\n')
            .map(|line| {
                if line.starts_with('[') || line.is_empty() {
                    // Keep sections and empty lines.
                    line.to_string()
                } else {
                    format!("# {line}")
                }
            })
            .collect();
        Ok(format!("# catdns configuration file\n\n{}", commented_out.join("\n")))
    }
}

/// Read the catdns config file.
pub fn read_config(path: &Path) -> Result<ConfigToml, anyhow::Error> {
    let config_str = fs::read_to_string(path)?;
    let config: ConfigToml = toml::from_str(&config_str)?;
    Ok(config)
}

/// Read or create a config file at a given path.
pub fn read_or_create_config(path: &Path) -> Result<ConfigToml, anyhow::Error> {
    let path = expand_tilde(path);
    if path.is_file() {
        return read_config(&path).map_err(|err| anyhow!("Failed to read {}. {err}", path.display()));
    }
    if path.exists() {
        return Err(anyhow!("Config path {} is not a file.", path.display()));
    }

    tracing::info!("Create a new config file from scratch {}.", path.display());
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&path, ConfigToml::commented_out_sample()?)?;
    Ok(ConfigToml::default())
}

/// Expands the ~ to the users home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(without_home) = path.strip_prefix("~") {
        if let Some(home) = home_dir() {
            return home.join(without_home);
        }
    }
    path.to_path_buf()
}
