use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://apis.iflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "qwen3-coder-plus";
/// API keys are re-requested once they are this many days old.
pub const API_KEY_VALID_DAYS: i64 = 7;
const ENV_PREFIX: &str = "IFLOW";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_updated_at: Option<DateTime<Utc>>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_key_updated_at: None,
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.7,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Saved conversations, one JSON file each.
    pub history_dir: String,
    pub auto_save: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_dir: "~/.iflow/history".to_string(),
            auto_save: true,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub shell_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 30,
        }
    }
}

impl Config {
    /// `~/.iflow/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".iflow").join("config.toml"))
    }

    /// Load from defaults, the TOML file and `IFLOW__SECTION__KEY` variables,
    /// later sources winning. An explicitly named file must exist; the default
    /// one is optional.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = match config_path {
            Some(p) => {
                let path = expand_path(p);
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                path
            }
            None => Self::default_path()?,
        };

        let mut builder = config::Config::builder();
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// [`Config::load`] followed by command-line overrides.
    pub fn load_with_overrides(
        config_path: Option<&str>,
        model_override: Option<String>,
        url_override: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::load(config_path)?;
        if let Some(model) = model_override {
            config.api.model = model;
        }
        if let Some(url) = url_override {
            config.api.url = url;
        }
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, config_path: Option<&str>) -> Result<PathBuf> {
        let path = match config_path {
            Some(p) => expand_path(p),
            None => Self::default_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved configuration to {}", path.display());
        Ok(path)
    }

    pub fn set_api_key(&mut self, key: impl Into<String>, now: DateTime<Utc>) {
        self.api.api_key = Some(key.into());
        self.api.api_key_updated_at = Some(now);
    }

    /// Missing, never stamped, or stamped at least seven days ago.
    pub fn api_key_expired(&self, now: DateTime<Utc>) -> bool {
        let has_key = self
            .api
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        match (has_key, self.api.api_key_updated_at) {
            (true, Some(updated)) => now - updated >= Duration::days(API_KEY_VALID_DAYS),
            _ => true,
        }
    }

    pub fn api_key_days_remaining(&self, now: DateTime<Utc>) -> i64 {
        match self.api.api_key_updated_at {
            Some(updated) if !self.api_key_expired(now) => {
                (API_KEY_VALID_DAYS - (now - updated).num_days()).max(0)
            }
            _ => 0,
        }
    }

    pub fn history_dir(&self) -> PathBuf {
        expand_path(&self.storage.history_dir)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.storage.log_file.as_deref().map(expand_path)
    }
}

fn expand_path(path: &str) -> PathBuf {
    Path::new(shellexpand::tilde(path).as_ref()).to_path_buf()
}
