use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::SessionOptions;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

const ENV_SERVER_URL: &str = "CHAT_SERVER_URL";
const ENV_USERNAME: &str = "CHAT_USERNAME";
const ENV_TOKEN: &str = "CHAT_TOKEN";
const ENV_PASSWORD: &str = "CHAT_PASSWORD";

/// Upper bound for every configured delay or window (one hour).
const MAX_DELAY_MS: u64 = 3_600_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the chat server; `http` maps to `ws`, `https` to `wss`.
    pub server_url: String,
    pub username: Option<String>,
    pub token: Option<String>,
    /// Only ever read from the environment, never written back.
    #[serde(skip)]
    pub password: Option<String>,
    pub reconnect_delay_ms: u64,
    pub typing_idle_ms: u64,
    pub remote_typing_timeout_ms: u64,
    pub dedup_window_ms: i64,
    pub sent_window_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            username: None,
            token: None,
            password: None,
            reconnect_delay_ms: 3_000,
            typing_idle_ms: 3_000,
            remote_typing_timeout_ms: 6_000,
            dedup_window_ms: 5_000,
            sent_window_capacity: 100,
        }
    }
}

impl AppConfig {
    /// Apply `CHAT_*` variables (from the process or a `.env` file).
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.username = Some(username);
        }
        if let Some(token) = lookup(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.password = Some(password);
        }
    }

    fn server(&self) -> Result<Url, ConfigError> {
        Url::parse(self.server_url.trim()).map_err(|err| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: err.to_string(),
        })
    }

    /// Base URL for the HTTP API.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let mut url = self.server()?;
        match url.scheme() {
            "http" | "https" => {}
            "ws" => set_scheme(&mut url, "http")?,
            "wss" => set_scheme(&mut url, "https")?,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        url.set_path("/");
        url.set_query(None);
        Ok(url)
    }

    /// `<ws|wss>://<host>/ws`, without the token.
    pub fn websocket_endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = self.server()?;
        match url.scheme() {
            "ws" | "wss" => {}
            "http" => set_scheme(&mut url, "ws")?,
            "https" => set_scheme(&mut url, "wss")?,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        url.set_path("/ws");
        url.set_query(None);
        Ok(url)
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        let mut options = SessionOptions::new(self.websocket_endpoint()?);
        options.reconnect_delay = clamped(self.reconnect_delay_ms);
        options.typing_idle = clamped(self.typing_idle_ms);
        options.remote_typing_timeout = clamped(self.remote_typing_timeout_ms);
        options.dedup_window =
            TimeDelta::milliseconds(self.dedup_window_ms.clamp(0, MAX_DELAY_MS as i64));
        options.sent_window_capacity = self.sent_window_capacity;
        Ok(options)
    }
}

fn clamped(ms: u64) -> Duration {
    Duration::from_millis(ms.min(MAX_DELAY_MS))
}

fn set_scheme(url: &mut Url, scheme: &str) -> Result<(), ConfigError> {
    url.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(url.scheme().to_string()))
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

/// Remember the user and token after a successful login. Environment
/// overrides are not written back.
pub fn persist_credentials(path: &str, username: &str, token: &str) {
    let mut config = load_config(path);
    config.username = Some(username.to_string());
    config.token = Some(token.to_string());

    if let Err(err) = save_config(path, &config) {
        log::error!("Failed to write config {}: {err}", path);
    } else {
        log::info!("Saved credentials for {} to {}", username, path);
    }
}

/// Drop a stored token the server no longer accepts, so the next start
/// logs in with the password again.
pub fn forget_token(path: &str) {
    let mut config = load_config(path);
    if config.token.take().is_none() {
        return;
    }

    if let Err(err) = save_config(path, &config) {
        log::error!("Failed to write config {}: {err}", path);
    } else {
        log::info!("Removed saved token from {}", path);
    }
}
