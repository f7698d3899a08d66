/// `commands/book.rs` — per-channel named scripts
///
/// Stored in the value store under the channel key `commands` as a
/// `{ name: script }` object. Names are lower-cased and trimmed.
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::db::{StoreResult, ValueStore};

pub const COMMANDS_KEY: &str = "commands";

#[derive(Clone)]
pub struct CommandBook {
    store: Arc<dyn ValueStore>,
}

impl CommandBook {
    pub fn new(store: Arc<dyn ValueStore>) -> Self {
        Self { store }
    }

    /// Store `script` as `name` for `channel`, replacing any earlier definition.
    /// Returns the normalized name.
    pub fn define(&self, channel: &str, name: &str, script: &str) -> StoreResult<String> {
        let name = normalize(name);
        let mut commands = self.commands(channel)?;
        commands.insert(name.clone(), Value::String(script.to_string()));
        self.store
            .set_channel_value(channel, COMMANDS_KEY, Value::Object(commands))?;
        log::info!("[commands] defined '{name}' in {channel}");
        Ok(name)
    }

    pub fn lookup(&self, channel: &str, name: &str) -> StoreResult<Option<String>> {
        let commands = self.commands(channel)?;
        Ok(commands
            .get(&normalize(name))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Defined names for `channel`, sorted.
    pub fn names(&self, channel: &str) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.commands(channel)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn commands(&self, channel: &str) -> StoreResult<Map<String, Value>> {
        match self.store.get_channel_value(channel, COMMANDS_KEY)? {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => {
                log::warn!("[commands] ignoring malformed command table in {channel}: {other}");
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
