//! Session configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::CoreError;
use crate::Result;

/// Environment variable overriding the identity service base URL
pub const API_URL_ENV: &str = "LATCHKEY_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the identity service; endpoint paths are appended to it
    pub api_base_url: Url,
    /// Path to the credential database
    pub database_path: PathBuf,
    /// Name of the credential cookie
    pub cookie_name: String,
    /// Path scope of the credential cookie
    pub cookie_path: String,
    /// Lifetime of a freshly issued credential
    pub credential_max_age_days: i64,
    /// Per-request timeout against the identity service
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            api_base_url: default_api_url(),
            database_path: data_dir.join("session.db"),
            cookie_name: "token".to_string(),
            cookie_path: "/".to_string(),
            credential_max_age_days: latchkey_session::DEFAULT_CREDENTIAL_MAX_AGE_DAYS,
            request_timeout_secs: 15,
        }
    }

    /// Defaults, with the API base URL taken from `LATCHKEY_API_URL` when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(API_URL_ENV) {
            config.api_base_url = parse_api_url(&raw)?;
        }

        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Latchkey"))
            .unwrap_or_else(|| PathBuf::from(".latchkey"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default API URL is valid")
}

fn parse_api_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CoreError::Config(format!("{API_URL_ENV} is not a URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CoreError::Config(format!(
            "{API_URL_ENV} must be http or https, got {other}"
        ))),
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
