use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DockError, Result};

const APP_DIR_NAME: &str = "QuickDock";
const HOME_ENV_VAR: &str = "QUICKDOCK_HOME";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "quickdock.db";

pub const DEFAULT_FAVICON_SERVICE: &str =
    "https://www.google.com/s2/favicons?domain={domain}&sz=64";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) QuickDock/0.1 Safari/537.36";

/// Tunables for the dock. Every field falls back to its default when the
/// config file omits it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockConfig {
    pub idle_dim_ms: u64,
    pub hide_delay_ms: u64,
    pub reentry_debounce_ms: u64,
    pub indicator_reveal_ms: u64,
    pub change_debounce_ms: u64,
    pub fetch_timeout_ms: u64,
    pub store_poll_ms: u64,
    /// Template with a `{domain}` placeholder.
    pub favicon_service: String,
    pub icon_size: u32,
    pub max_icon_bytes: usize,
    pub max_html_bytes: usize,
    pub user_agent: String,
}

impl Default for DockConfig {
    fn default() -> Self {
        Self {
            idle_dim_ms: 2000,
            hide_delay_ms: 200,
            reentry_debounce_ms: 1000,
            indicator_reveal_ms: 500,
            change_debounce_ms: 100,
            fetch_timeout_ms: 3000,
            store_poll_ms: 250,
            favicon_service: DEFAULT_FAVICON_SERVICE.to_string(),
            icon_size: 64,
            max_icon_bytes: 512 * 1024,
            max_html_bytes: 1_500_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DockConfig {
    /// Reads `path`; a missing or malformed file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("config {} not read ({}); using defaults", path.display(), err);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("config {} is malformed: {}; using defaults", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn favicon_service_url(&self, domain: &str) -> String {
        self.favicon_service.replace("{domain}", domain)
    }
}

pub fn app_root_path() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
        return Ok(PathBuf::from(home));
    }
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| DockError::Unavailable("no platform data directory".to_string()))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(app_root_path()?.join(CONFIG_FILE_NAME))
}

pub fn db_path() -> Result<PathBuf> {
    Ok(app_root_path()?.join(DB_FILE_NAME))
}
