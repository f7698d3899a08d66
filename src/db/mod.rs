/// `db/` — nick- and channel-scoped key/value storage
///
/// Scripts only ever read through `StoreProxy`; writes come from the command
/// book. Identifiers are case-insensitive, as chat nicks and channels are.
pub mod memory;

pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait ValueStore: Send + Sync {
    fn get_nick_value(&self, nick: &str, key: &str) -> StoreResult<Option<serde_json::Value>>;

    fn set_nick_value(&self, nick: &str, key: &str, value: serde_json::Value) -> StoreResult<()>;

    fn get_channel_value(
        &self,
        channel: &str,
        key: &str,
    ) -> StoreResult<Option<serde_json::Value>>;

    fn set_channel_value(
        &self,
        channel: &str,
        key: &str,
        value: serde_json::Value,
    ) -> StoreResult<()>;

    /// Channel value when `name` looks like a channel, nick value otherwise.
    fn get_nick_or_channel_value(
        &self,
        name: &str,
        key: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        if is_channel(name) {
            self.get_channel_value(name, key)
        } else {
            self.get_nick_value(name, key)
        }
    }

    /// First value found for `key` among `names`, in order.
    fn get_preferred_value(
        &self,
        names: &[String],
        key: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        for name in names {
            if let Some(value) = self.get_nick_or_channel_value(name, key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

pub fn is_channel(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('&')
}
