//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. An explicit `--config` path
//! 2. `pharmachain.toml` next to the executable
//! 3. `~/.config/pharmachain/config.toml` (`%APPDATA%\PharmaChain\config.toml` on Windows)
//! 4. Built-in defaults
//!
//! Environment variables (`PHARMACHAIN_DB`, `PHARMACHAIN_LOG_LEVEL`,
//! `PHARMACHAIN_STATUS_POLICY`) override file values.  CLI arguments take
//! precedence over both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::controller::{LifecyclePolicy, StatusPolicy};
use crate::error::{Result, ResultExt as _};

pub const CONFIG_FILE_NAME: &str = "pharmachain.toml";

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PharmaConfig {
    pub paths: PathsConfig,
    /// Only read by `init-ledger`; afterwards the policy lives on the ledger.
    pub policy: LifecyclePolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
    pub keys_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// JSON-lines log file. Empty means no file logging.
    pub json_log_file: String,
    pub json_stdout: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("pharmachain-ledger.db"),
            keys_dir: PathBuf::from("pharmachain-keys"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl PharmaConfig {
    /// Returns `Ok(default)` if the file does not exist, `Err` if it exists
    /// but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        toml::from_str(&text).ctx_config("parse config TOML")
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        #[cfg(windows)]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                let candidate = PathBuf::from(appdata).join("PharmaChain").join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        #[cfg(not(windows))]
        {
            if let Some(home) = std::env::var_os("HOME") {
                let candidate = PathBuf::from(home)
                    .join(".config")
                    .join("pharmachain")
                    .join("config.toml");
                if candidate.exists() {
                    return Self::load_from(&candidate);
                }
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(db) = var("PHARMACHAIN_DB") {
            self.paths.db = PathBuf::from(db);
        }
        if let Some(level) = var("PHARMACHAIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(policy) = var("PHARMACHAIN_STATUS_POLICY") {
            self.policy.status_policy = policy.parse::<StatusPolicy>()?;
        }
        Ok(())
    }
}
