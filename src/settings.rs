//! Startup settings, read once from `settings.json` and handed to the engine.
use crate::error::{EngineError, Result};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "brewdeck";
const SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_POLL_INTERVAL: &str = "15m";
pub const POLL_INTERVAL_ENV: &str = "BREWDECK_POLL_INTERVAL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Explicit `brew` executable; detected when absent.
    pub brew_path: Option<PathBuf>,
    pub poll_interval: String,
    pub initial_poll_delay_secs: u64,
    pub notify_on_new_outdated: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            brew_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL.to_string(),
            initial_poll_delay_secs: 5,
            notify_on_new_outdated: true,
            log_dir: None,
        }
    }
}

impl Settings {
    /// The effective poll period, honouring `BREWDECK_POLL_INTERVAL`.
    /// `None` means polling is off.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_from(env::var(POLL_INTERVAL_ENV).ok())
    }

    fn poll_interval_from(&self, override_raw: Option<String>) -> Option<Duration> {
        let raw = override_raw
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.poll_interval.clone());
        parse_update_interval(&raw).map(Duration::from_secs)
    }

    pub fn initial_poll_delay(&self) -> Duration {
        Duration::from_secs(self.initial_poll_delay_secs)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR).join("logs")))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn resolve_brew_path(&self) -> Result<PathBuf> {
        match &self.brew_path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(EngineError::Config(format!(
                "Configured brew path {} does not exist",
                path.display()
            ))),
            None => utils::detect_brew_path(),
        }
    }
}

/// Returns the path to the settings file, typically
/// `~/.config/brewdeck/settings.json`.
pub fn settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
        .ok_or_else(|| {
            EngineError::Config("Could not determine the user's config directory.".to_string())
        })
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(&settings_path()?)
}

/// Reads settings from `path`. A missing file yields the defaults.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        log::debug!("No settings file at {}, using defaults", path.display());
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::Config(format!(
            "Failed to parse settings at {}: {}",
            path.display(),
            e
        ))
    })
}

/// Parses an interval setting into seconds. `off` (or an empty value)
/// disables polling.
pub fn parse_update_interval(interval_raw: &str) -> Option<u64> {
    let raw = interval_raw.trim();
    let secs = match raw {
        "" | "off" => None,
        "15m" => Some(900),
        "30m" => Some(1800),
        "1h" => Some(3600),
        "6h" => Some(21600),
        "24h" | "1d" => Some(86400),
        "7d" | "1w" => Some(604800),
        custom if custom.starts_with("custom:") => custom[7..].trim().parse::<u64>().ok(),
        other => {
            let unit = other.chars().last().unwrap_or('0');
            let digits = &other[..other.len() - unit.len_utf8()];
            let scale = match unit {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86400,
                _ => return other.parse::<u64>().ok().filter(|s| *s > 0),
            };
            // Out-of-range values are rejected rather than wrapped.
            digits
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(scale))
        }
    };
    secs.filter(|s| *s > 0)
}
