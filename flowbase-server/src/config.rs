//! Server configuration
//!
//! Loaded from a TOML file (`FLOWBASE_CONFIG` env var, falling back to
//! `flowbase.toml`), with defaults when the file is absent. The logical
//! collection name is fixed here and never user-supplied.

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Logical database name
    #[serde(default = "default_database")]
    pub database: String,

    /// The one collection every operation runs against
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Optional GitHub API token for the repository analyzer
    #[serde(default)]
    pub github_token: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_database() -> String {
    "flowbase_demo".to_string()
}

fn default_collection() -> String {
    "demo_collection".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            collection: default_collection(),
            github_token: None,
        }
    }
}

/// Load configuration from disk, falling back to defaults.
/// A GITHUB_TOKEN env var overrides the file's analyzer token.
pub fn load_config() -> anyhow::Result<Config> {
    let config_path =
        std::env::var("FLOWBASE_CONFIG").unwrap_or_else(|_| "flowbase.toml".to_string());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let content = std::fs::read_to_string(&config_path)?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", config_path, e))?
    } else {
        warn!("Config file not found, using defaults");
        Config::default()
    };

    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        if !token.is_empty() {
            config.github_token = Some(token);
        }
    }

    Ok(config)
}
