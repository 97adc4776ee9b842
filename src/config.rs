// ⚙️ Configuration - paths and tuning knobs
// Binaries fill this from CLI flags / environment (clap), tests build it by hand.

use std::path::{Path, PathBuf};
use tracing::warn;

/// Initial recommendation (seconds) for a freshly registered account.
pub const DEFAULT_COOLDOWN: f64 = 120.0;

/// EMA smoothing factor for cooldown learning.
pub const EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct StewardConfig {
    /// Root directory for everything below
    pub data_dir: PathBuf,

    /// SQLite database (accounts, links, events)
    pub db_file: PathBuf,

    /// Directory holding `<session_name>.session` credential files
    pub sessions_dir: PathBuf,

    /// Newline-delimited links consumed by `/seed_links`
    pub links_file: PathBuf,

    /// Cooldown assigned on registration and used for missing accounts
    pub default_cooldown: f64,

    /// Smoothing factor for the cooldown EMA
    pub ema_alpha: f64,

    /// Base URL of the auth-bridge sidecar
    pub provider_url: String,
}

impl StewardConfig {
    /// Lay out all paths under one data directory
    pub fn from_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();

        StewardConfig {
            db_file: data_dir.join("links.db"),
            sessions_dir: data_dir.join("sessions"),
            links_file: data_dir.join("links.txt"),
            data_dir,
            default_cooldown: DEFAULT_COOLDOWN,
            ema_alpha: EMA_ALPHA,
            provider_url: "http://127.0.0.1:8081".to_string(),
        }
    }

    /// Estimates must stay strictly positive; anything else keeps the current value
    pub fn with_default_cooldown(mut self, seconds: f64) -> Self {
        if seconds > 0.0 && seconds.is_finite() {
            self.default_cooldown = seconds;
        } else {
            warn!(
                rejected = seconds,
                kept = self.default_cooldown,
                "default cooldown must be a positive number of seconds"
            );
        }
        self
    }

    pub fn with_provider_url(mut self, url: impl Into<String>) -> Self {
        self.provider_url = url.into();
        self
    }

    /// Path of the advisory export artifact for one session
    pub fn assist_file(&self, session_name: &str) -> PathBuf {
        self.data_dir.join(format!("assist_{}.txt", session_name))
    }
}

/// clap value parser for `--default-cooldown`
pub fn parse_positive_seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number of seconds", value))?;

    if seconds > 0.0 && seconds.is_finite() {
        Ok(seconds)
    } else {
        Err(format!("cooldown must be a positive number of seconds, got `{}`", value))
    }
}

impl Default for StewardConfig {
    fn default() -> Self {
        StewardConfig::from_data_dir(".")
    }
}
