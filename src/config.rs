use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub platform: PlatformConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "GENAI_API_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Identifiers used when a knowledge base has to be created. Anything left
/// out here is looked up on existing knowledge bases or agents instead.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvisioningConfig {
    pub project_id: Option<String>,
    pub database_id: Option<String>,
    pub embedding_model_id: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_attempts() -> u32 {
    180
}
fn default_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl PlatformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate platform
    let base_url = config.platform.base_url.trim();
    if base_url.is_empty() {
        anyhow::bail!("platform.base_url must not be empty");
    }
    if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
        anyhow::bail!(
            "platform.base_url must start with http:// or https://, got '{}'",
            base_url
        );
    }
    if config.platform.timeout_secs == 0 {
        anyhow::bail!("platform.timeout_secs must be > 0");
    }
    if config.platform.token_env.trim().is_empty() {
        anyhow::bail!("platform.token_env must name an environment variable");
    }

    // Validate monitor
    if config.monitor.max_attempts < 1 {
        anyhow::bail!("monitor.max_attempts must be >= 1");
    }
    if config.monitor.interval_ms == 0 {
        anyhow::bail!("monitor.interval_ms must be > 0");
    }

    Ok(())
}
