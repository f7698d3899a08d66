use std::sync::Arc;

use thiserror::Error;

use crate::{
    commands::CommandDispatcher,
    config::{BotConfig, ConfigError},
    db::{MemoryStore, StoreError, ValueStore},
    scripting::ScriptHost,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a running bot shares between messages.
pub struct BotState {
    pub config: BotConfig,
    pub store: Arc<dyn ValueStore>,
    pub host: Arc<ScriptHost>,
    pub dispatcher: CommandDispatcher,
}

impl BotState {
    /// Open the value store named by the config (in-memory when none) and
    /// build the script host and dispatcher on top of it.
    pub fn from_config(config: BotConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let store: Arc<dyn ValueStore> = match &config.db_path {
            Some(path) => {
                log::info!("[state] value store: {}", path.display());
                Arc::new(MemoryStore::open(path)?)
            }
            None => {
                log::info!("[state] value store: in memory");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: BotConfig, store: Arc<dyn ValueStore>) -> Result<Self, StartupError> {
        let host = Arc::new(ScriptHost::new(config.sandbox.clone(), Arc::clone(&store))?);
        let dispatcher = CommandDispatcher::new(&config, Arc::clone(&host));
        Ok(Self {
            config,
            store,
            host,
            dispatcher,
        })
    }
}
