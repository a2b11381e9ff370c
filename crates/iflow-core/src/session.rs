use chrono::{DateTime, Duration, Utc};
use iflow_config::{Config, API_KEY_VALID_DAYS};
use iflow_providers::{CompletionRequest, Endpoint, Message};
use tracing::info;

/// Settings a running session reads on every request and the operator can
/// change with `/api`, `/model`, `/url` and `/debug`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    api_url: String,
    api_key: Option<String>,
    api_key_updated_at: Option<DateTime<Utc>>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    debug: bool,
    auto_save: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.api.url.clone(),
            api_key: config.api.api_key.clone(),
            api_key_updated_at: config.api.api_key_updated_at,
            model: config.api.model.clone(),
            max_tokens: config.api.max_tokens,
            temperature: config.api.temperature,
            top_p: config.api.top_p,
            debug: false,
            auto_save: config.storage.auto_save,
        }
    }

    /// Copy the values the operator may have changed back into `config`.
    pub fn write_back(&self, config: &mut Config) {
        config.api.url = self.api_url.clone();
        config.api.model = self.model.clone();
        config.api.api_key = self.api_key.clone();
        config.api.api_key_updated_at = self.api_key_updated_at;
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save
    }

    pub fn set_api_url(&mut self, url: impl Into<String>) {
        self.api_url = url.into();
        info!("API URL set to {}", self.api_url);
    }

    pub fn set_api_key(&mut self, key: impl Into<String>, now: DateTime<Utc>) {
        self.api_key = Some(key.into());
        self.api_key_updated_at = Some(now);
        info!("API key updated");
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        info!("Model set to {}", self.model);
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
        info!("Debug mode {}", if enabled { "on" } else { "off" });
    }

    pub fn set_auto_save(&mut self, enabled: bool) {
        self.auto_save = enabled;
    }

    /// Key with all but the first and last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            None | Some("") => "not set".to_string(),
            Some(key) if key.chars().count() <= 8 => "****".to_string(),
            Some(key) => {
                let chars: Vec<char> = key.chars().collect();
                let head: String = chars[..4].iter().collect();
                let tail: String = chars[chars.len() - 4..].iter().collect();
                format!("{}...{}", head, tail)
            }
        }
    }

    /// `valid for N more days`, `expired` or `not set`.
    pub fn api_key_status(&self, now: DateTime<Utc>) -> String {
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return "not set".to_string();
        }
        match self.api_key_updated_at {
            Some(updated) => {
                let remaining = API_KEY_VALID_DAYS - (now - updated).num_days();
                if now - updated >= Duration::days(API_KEY_VALID_DAYS) {
                    "expired".to_string()
                } else {
                    format!("valid for {} more days", remaining)
                }
            }
            None => "expired".to_string(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            url: self.api_url.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Streaming request with the session's sampling settings.
    pub fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            stream: true,
        }
    }
}
