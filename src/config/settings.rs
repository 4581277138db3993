//! Application settings and configuration types.
//!
//! Settings are persisted to `~/.config/chime/settings.json` (or the
//! platform equivalent) and loaded at startup. A missing file yields
//! defaults; an unreadable or malformed file is an error so a typo does not
//! silently reset the configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Polling cadence.
    pub poll: PollSettings,
    /// Audible alert preferences.
    pub alert: AlertSettings,
    /// Credential file locations and authorization behavior.
    pub auth: AuthSettings,
}

/// Polling cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Seconds between successful poll iterations.
    pub interval_seconds: u64,
    /// Seconds to wait after a transient failure before polling again.
    pub error_backoff_seconds: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 15,
            error_backoff_seconds: 30,
        }
    }
}

impl PollSettings {
    /// Interval between successful iterations.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Backoff after a transient failure.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }
}

/// Audible alert preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// How the audible cue is produced.
    pub mode: AlertMode,
}

/// Alert backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// Pick the best backend for the platform.
    #[default]
    Auto,
    /// Always use desktop notifications.
    Desktop,
    /// Always use the console bell.
    Bell,
    /// No audible cue.
    Silent,
}

/// Credential file locations and authorization behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Path to the Google client secret file. Defaults to
    /// `client_secret.json` in the config directory.
    pub client_secret_path: Option<PathBuf>,
    /// Path to the persisted token file. Defaults to `token.json` in the
    /// config directory.
    pub token_path: Option<PathBuf>,
    /// Seconds to wait for the interactive authorization callback.
    pub callback_timeout_seconds: Option<u64>,
}

impl AuthSettings {
    const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 120;

    /// Resolved client secret path.
    pub fn client_secret_path(&self) -> PathBuf {
        self.client_secret_path
            .clone()
            .unwrap_or_else(|| config_dir().join("client_secret.json"))
    }

    /// Resolved token path.
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| config_dir().join("token.json"))
    }

    /// Resolved callback timeout.
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(
            self.callback_timeout_seconds
                .unwrap_or(Self::DEFAULT_CALLBACK_TIMEOUT_SECS),
        )
    }
}

/// The per-user configuration directory.
pub(crate) fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "chime")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Settings {
    /// The default settings file location.
    pub fn default_path() -> PathBuf {
        config_dir().join("settings.json")
    }

    /// Loads settings from the given path, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves settings to the given path, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
