//! Configuration for the quadro server and CLI.
//!
//! Settings are read from `.quadro/quadro.toml` and layered
//! file → `.env` / environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! dev_mode = false
//!
//! [database]
//! path = ".quadro/quadro.db"
//!
//! [transfers]
//! copy_tags_on_clone = false
//! history_limit = 50
//! max_history_limit = 200
//!
//! [notifications]
//! due_soon_days = 3
//!
//! [logging]
//! filter = "quadro=info,tower_http=info"
//! format = "pretty"
//! # directory = ".quadro/logs"
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::board::notify;

/// Name of the per-project state directory.
pub const QUADRO_DIR: &str = ".quadro";

/// Config file name inside [`QUADRO_DIR`].
pub const CONFIG_FILE: &str = "quadro.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served frontend.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(QUADRO_DIR).join("quadro.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransfersSection {
    /// Recreate the source card's tags on a clone.
    #[serde(default)]
    pub copy_tags_on_clone: bool,
    /// Page size for `GET /transfers/history` when no limit is given.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "default_max_history_limit")]
    pub max_history_limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

fn default_max_history_limit() -> u32 {
    200
}

impl Default for TransfersSection {
    fn default() -> Self {
        Self {
            copy_tags_on_clone: false,
            history_limit: default_history_limit(),
            max_history_limit: default_max_history_limit(),
        }
    }
}

impl TransfersSection {
    /// Clamp a requested page size to `[1, max_history_limit]`.
    pub fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        let max = self.max_history_limit.max(1);
        requested.unwrap_or(self.history_limit).clamp(1, max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsSection {
    #[serde(default = "default_due_soon_days")]
    pub due_soon_days: u32,
}

fn default_due_soon_days() -> u32 {
    3
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            due_soon_days: default_due_soon_days(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write a daily-rotated log file here in addition to stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_filter() -> String {
    "quadro=info,tower_http=info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// Parsed `quadro.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadroConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub transfers: TransfersSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl QuadroConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse quadro.toml")
    }

    /// Load `<dir>/quadro.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(quadro_dir: &Path) -> Result<Self> {
        let config_path = quadro_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize quadro.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve the full layered configuration for a project directory:
    /// file, then `.env`, then `QUADRO_*` environment variables.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let _ = dotenvy::from_path(project_dir.join(".env"));
        let mut config = Self::load_or_default(&project_dir.join(QUADRO_DIR))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `QUADRO_HOST`, `QUADRO_PORT` and `QUADRO_DB_PATH` overrides.
    pub fn apply_env<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = get("QUADRO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("QUADRO_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid QUADRO_PORT '{}'", port))?;
        }
        if let Some(path) = get("QUADRO_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.transfers.history_limit > self.transfers.max_history_limit {
            warnings.push(format!(
                "history_limit {} exceeds max_history_limit {}; it will be clamped",
                self.transfers.history_limit, self.transfers.max_history_limit
            ));
        }
        if self.transfers.max_history_limit == 0 {
            warnings.push("max_history_limit is 0; treating it as 1".to_string());
        }
        if notify::due_horizon(Utc::now(), self.notifications.due_soon_days).is_err() {
            warnings.push(format!(
                "due_soon_days {} reaches past the supported calendar; `quadro notify` will fail",
                self.notifications.due_soon_days
            ));
        }
        if self.server.dev_mode && self.server.host == default_host() {
            warnings.push(
                "dev_mode is on but host is loopback; remote frontends cannot connect".to_string(),
            );
        }

        warnings
    }
}
