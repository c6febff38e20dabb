use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::cdn::DEFAULT_CDN_ORIGIN;
use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cdn: CdnConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

/// How the shows endpoint is scoped to a category.
///
/// The catalog service has been seen in all three shapes; `Combined` fetches
/// one unfiltered list and associates shows client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowsEndpoint {
    /// `GET /categories/shows`
    #[default]
    Combined,
    /// `GET /categories/shows?category=<id>`
    Query,
    /// `GET /categories/<id>/shows`
    Path,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub shows_endpoint: ShowsEndpoint,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bearer token issued by the identity provider, if the service wants one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    #[serde(default = "default_cdn_origin")]
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// When false, tracks are loaded paused and the session reports
    /// autoplay-blocked until the user resumes.
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    /// Seconds without audio before a load is reported as failed.
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            shows_endpoint: ShowsEndpoint::default(),
            timeout_secs: default_timeout_secs(),
            api_token: None,
        }
    }
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            origin: default_cdn_origin(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            autoplay: default_autoplay(),
            load_timeout_secs: default_load_timeout_secs(),
        }
    }
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("daemon.log")
}

fn default_catalog_base_url() -> String {
    "https://fz7forxwz8.execute-api.ap-south-1.amazonaws.com/prod".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_cdn_origin() -> String {
    DEFAULT_CDN_ORIGIN.to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.5
}

fn default_autoplay() -> bool {
    true
}

fn default_load_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
