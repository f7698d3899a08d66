/// `db/memory.rs` — in-memory `ValueStore`, optionally mirrored to a JSON file
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use super::{StoreError, StoreResult, ValueStore};

type Scope = HashMap<String, HashMap<String, serde_json::Value>>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    nicks: Scope,
    #[serde(default)]
    channels: Scope,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// Rewritten after every successful write when set.
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists; later writes are saved back to it.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let tables = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
            serde_json::from_str(&text)?
        } else {
            Tables::default()
        };
        Ok(Self {
            tables: Mutex::new(tables),
            path: Some(path),
        })
    }

    fn get(&self, pick: fn(&Tables) -> &Scope, name: &str, key: &str) -> Option<serde_json::Value> {
        let tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pick(&tables)
            .get(&normalize(name))
            .and_then(|values| values.get(key))
            .cloned()
    }

    fn set(
        &self,
        pick: fn(&mut Tables) -> &mut Scope,
        name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pick(&mut tables)
            .entry(normalize(name))
            .or_default()
            .insert(key.to_string(), value);
        if let Some(path) = &self.path {
            save(path, &tables)?;
        }
        Ok(())
    }
}

impl ValueStore for MemoryStore {
    fn get_nick_value(&self, nick: &str, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.get(|t| &t.nicks, nick, key))
    }

    fn set_nick_value(&self, nick: &str, key: &str, value: serde_json::Value) -> StoreResult<()> {
        self.set(|t| &mut t.nicks, nick, key, value)
    }

    fn get_channel_value(
        &self,
        channel: &str,
        key: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.get(|t| &t.channels, channel, key))
    }

    fn set_channel_value(
        &self,
        channel: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StoreResult<()> {
        self.set(|t| &mut t.channels, channel, key, value)
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase()
}

fn save(path: &Path, tables: &Tables) -> StoreResult<()> {
    let text = serde_json::to_string_pretty(tables)?;
    fs::write(path, text).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_are_case_insensitive() {
        let store = MemoryStore::new();
        store.set_nick_value("Alice", "color", json!("blue")).unwrap();
        assert_eq!(
            store.get_nick_value("alice", "color").unwrap(),
            Some(json!("blue"))
        );
    }

    #[test]
    fn nick_or_channel_dispatches_on_prefix() {
        let store = MemoryStore::new();
        store.set_channel_value("#lobby", "topic", json!("hi")).unwrap();
        store.set_nick_value("bob", "topic", json!("bob's")).unwrap();

        assert_eq!(
            store.get_nick_or_channel_value("#lobby", "topic").unwrap(),
            Some(json!("hi"))
        );
        assert_eq!(
            store.get_nick_or_channel_value("bob", "topic").unwrap(),
            Some(json!("bob's"))
        );
    }

    #[test]
    fn preferred_value_takes_first_hit() {
        let store = MemoryStore::new();
        store.set_channel_value("#lobby", "tz", json!("UTC")).unwrap();
        let names = vec!["carol".to_string(), "#lobby".to_string()];
        assert_eq!(
            store.get_preferred_value(&names, "tz").unwrap(),
            Some(json!("UTC"))
        );

        store.set_nick_value("carol", "tz", json!("CET")).unwrap();
        assert_eq!(
            store.get_preferred_value(&names, "tz").unwrap(),
            Some(json!("CET"))
        );
        assert_eq!(store.get_preferred_value(&names, "missing").unwrap(), None);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        {
            let store = MemoryStore::open(&path).unwrap();
            store
                .set_channel_value("#lobby", "commands", json!({ "hi": "return 'hi'" }))
                .unwrap();
        }
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(
            reopened.get_channel_value("#LOBBY", "commands").unwrap(),
            Some(json!({ "hi": "return 'hi'" }))
        );
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(MemoryStore::open(&path), Err(StoreError::Json(_))));
    }
}
