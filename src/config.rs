/// `config.rs` — bot and sandbox settings
///
/// Read from a JSON file; every field has a default so an empty object is a
/// valid configuration. Command-line flags are applied on top by the binary.
use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scripting::quota::DEFAULT_MESSAGE_QUOTA;

pub const DEFAULT_ERROR_PREFIX: &str = "[lua] error: ";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Vetted directories scripts may `require` from, searched in order.
    pub module_dirs: Vec<PathBuf>,
    /// Modules required into every VM before the script runs.
    pub prelude: Vec<String>,
    /// Working directory for the duration of each run.
    pub sandbox_dir: Option<PathBuf>,
    pub message_quota: i64,
    pub error_prefix: String,
    /// VM instructions per run; unlimited when unset.
    pub instruction_limit: Option<u32>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            module_dirs: Vec::new(),
            prelude: Vec::new(),
            sandbox_dir: None,
            message_quota: DEFAULT_MESSAGE_QUOTA,
            error_prefix: DEFAULT_ERROR_PREFIX.to_string(),
            instruction_limit: None,
        }
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_quota < 0 {
            return Err(ConfigError::Invalid(format!(
                "message_quota must not be negative (got {})",
                self.message_quota
            )));
        }
        for dir in &self.module_dirs {
            if !dir.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "module directory {} does not exist",
                    dir.display()
                )));
            }
        }
        if self.prelude.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid("prelude module names must not be empty".into()));
        }
        Ok(())
    }

    /// The message sent once when a run exhausts its quota.
    pub fn quota_notice(&self) -> String {
        format!(
            "{}{}",
            self.error_prefix,
            crate::scripting::quota::QUOTA_EXCEEDED
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub nick: String,
    pub command_prefix: String,
    /// Minimum seconds between two script runs started by the same nick.
    pub rate_limit_secs: u64,
    /// JSON file backing the value store; in-memory only when unset.
    pub db_path: Option<PathBuf>,
    pub sandbox: SandboxConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: "luabot".to_string(),
            command_prefix: ".".to_string(),
            rate_limit_secs: 10,
            db_path: None,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: BotConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_prefix.is_empty() {
            return Err(ConfigError::Invalid("command_prefix must not be empty".into()));
        }
        if self.nick.trim().is_empty() {
            return Err(ConfigError::Invalid("nick must not be empty".into()));
        }
        self.sandbox.validate()
    }
}
