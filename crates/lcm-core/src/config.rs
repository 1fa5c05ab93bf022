use crate::workflow::{AttachmentSettings, UploadSettings};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the lcm admin tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub attachments: AttachmentSettings,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the hosted project, e.g. https://abc.supabase.co
    pub url: Option<String>,
    /// Public anon key. `${VAR}` is read from the environment.
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_resume_bucket")]
    pub resume_bucket: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum fuzzy score for a match
    #[serde(default = "default_threshold")]
    pub threshold: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_reconnect_seconds")]
    pub reconnect_seconds: u64,
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u64,
}

/// Service endpoint after environment overrides are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub url: String,
    pub anon_key: String,
}

fn default_resume_bucket() -> String {
    "resumes".to_string()
}

fn default_key_prefix() -> String {
    "public".to_string()
}

fn default_threshold() -> i64 {
    50
}

fn default_reconnect_seconds() -> u64 {
    5
}

fn default_heartbeat_seconds() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            resume_bucket: default_resume_bucket(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_seconds: default_reconnect_seconds(),
            heartbeat_seconds: default_heartbeat_seconds(),
        }
    }
}

/// Replace a whole-value `${VAR}` with the variable's contents
pub fn expand_env(value: &str) -> Result<String> {
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => env::var(var).with_context(|| format!("missing environment var {var}")),
        None => Ok(value.to_string()),
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        if let Ok(custom_path) = env::var("LCM_CONFIG") {
            return Self::load_from(&PathBuf::from(custom_path));
        }
        let config_path = Self::get_config_path()?;
        if !config_path.exists() {
            let default_config = Self::default();
            default_config.save_to(&config_path)?;
            return Ok(default_config);
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir.join(".config").join("lcm").join("config.toml"))
    }

    pub fn save(&self) -> Result<()> {
        let path = match env::var("LCM_CONFIG") {
            Ok(custom_path) => PathBuf::from(custom_path),
            Err(_) => Self::get_config_path()?,
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, format!("# lcm configuration\n\n{toml_str}"))
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Service URL and anon key, with `LCM_SERVICE_URL` and `LCM_ANON_KEY`
    /// taking precedence over the file
    pub fn resolved_service(&self) -> Result<ResolvedService> {
        let url = match env::var("LCM_SERVICE_URL") {
            Ok(url) => url,
            Err(_) => self
                .service
                .url
                .clone()
                .context("No service url configured. Set [service] url or LCM_SERVICE_URL")?,
        };
        let anon_key = match env::var("LCM_ANON_KEY") {
            Ok(key) => key,
            Err(_) => {
                let raw = self
                    .service
                    .anon_key
                    .as_deref()
                    .context("No anon key configured. Set [service] anon_key or LCM_ANON_KEY")?;
                expand_env(raw).context("Failed to expand [service] anon_key")?
            }
        };
        Ok(ResolvedService {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    pub fn upload_settings(&self) -> UploadSettings {
        UploadSettings {
            bucket: self.storage.resume_bucket.clone(),
            key_prefix: self.storage.key_prefix.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

/// Machine-specific state, never shared
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub auth: AuthState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl State {
    /// Load state from the default location
    pub fn load() -> Result<Self> {
        let state_path = Self::get_state_path()?;
        if !state_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&state_path)
    }

    /// Load state from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let state: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        Ok(state)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_state_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create state directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize state")?;
        fs::write(path, toml_str).context("Failed to write state file")?;
        Ok(())
    }

    /// `$LCM_STATE` or `~/.local/share/lcm/state.toml`
    pub fn get_state_path() -> Result<PathBuf> {
        if let Ok(custom_path) = env::var("LCM_STATE") {
            return Ok(PathBuf::from(custom_path));
        }
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir
            .join(".local")
            .join("share")
            .join("lcm")
            .join("state.toml"))
    }

    /// Check if the stored session exists and has not expired
    pub fn is_session_valid(&self) -> bool {
        match (&self.auth.access_token, self.auth.expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && Utc::now() < expires_at,
            _ => false,
        }
    }

    pub fn store_session(
        &mut self,
        email: String,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) {
        self.auth.email = Some(email);
        self.auth.access_token = Some(access_token);
        self.auth.refresh_token = refresh_token;
        self.auth.expires_at = Some(expires_at);
    }

    pub fn clear_session(&mut self) {
        self.auth = AuthState::default();
    }

    /// Access token of a valid session
    pub fn access_token(&self) -> Option<&str> {
        if self.is_session_valid() {
            self.auth.access_token.as_deref()
        } else {
            None
        }
    }
}
