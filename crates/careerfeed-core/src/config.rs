//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! which API to talk to, request timeout, token lifetimes, where credentials
//! are kept, and the last used username.
//!
//! Configuration is stored at `~/.config/careerfeed/config.json`.
//! `CAREERFEED_API_URL` and `CAREERFEED_ENV` override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::TokenLifetimes;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "careerfeed";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEV_API_URL: &str = "http://localhost:8000";
const PROD_API_URL: &str = "https://codeleap-production.up.railway.app";

pub const ENV_API_URL: &str = "CAREERFEED_API_URL";
pub const ENV_ENVIRONMENT: &str = "CAREERFEED_ENV";

/// Allowed access token lifetime, in minutes
const ACCESS_TTL_RANGE: std::ops::RangeInclusive<u64> = 5..=60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }

    fn default_api_url(self) -> &'static str {
        match self {
            Environment::Development => DEV_API_URL,
            Environment::Production => PROD_API_URL,
        }
    }
}

/// Where credentials are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackendKind {
    #[default]
    File,
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Falls back to the environment's default when unset.
    pub api_base_url: Option<String>,
    pub environment: Environment,
    pub request_timeout_secs: u64,
    pub access_token_ttl_minutes: u64,
    pub refresh_token_ttl_days: u64,
    pub session_freshness_hours: u64,
    pub credential_backend: CredentialBackendKind,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            environment: Environment::default(),
            request_timeout_secs: 10,
            access_token_ttl_minutes: 60,
            refresh_token_ttl_days: 7,
            session_freshness_hours: 24,
            credential_backend: CredentialBackendKind::default(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load from disk (defaults if absent) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    fn apply_env(&mut self) {
        let api_url = std::env::var(ENV_API_URL).ok();
        let environment = std::env::var(ENV_ENVIRONMENT).ok();
        self.apply_overrides(api_url.as_deref(), environment.as_deref());
    }

    /// Empty values are ignored, as are environment names we do not know.
    pub fn apply_overrides(&mut self, api_url: Option<&str>, environment: Option<&str>) {
        if let Some(env) = environment.and_then(Environment::parse) {
            self.environment = env;
        }
        if let Some(url) = api_url.map(str::trim).filter(|u| !u.is_empty()) {
            self.api_base_url = Some(url.to_string());
        }
    }

    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.default_api_url())
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.base_url();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("API base URL must start with http:// or https:// (got {})", url);
        }
        if self.environment == Environment::Production && !url.starts_with("https://") {
            bail!("Production requires an https:// API base URL (got {})", url);
        }
        if !ACCESS_TTL_RANGE.contains(&self.access_token_ttl_minutes) {
            bail!(
                "access_token_ttl_minutes must be between {} and {} (got {})",
                ACCESS_TTL_RANGE.start(),
                ACCESS_TTL_RANGE.end(),
                self.access_token_ttl_minutes
            );
        }
        if self.refresh_token_ttl_days == 0 {
            bail!("refresh_token_ttl_days must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            access: chrono::Duration::minutes(self.access_token_ttl_minutes as i64),
            refresh: chrono::Duration::days(self.refresh_token_ttl_days as i64),
        }
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_freshness_hours as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
