/// `scripting/host.rs` — the chat-side collaborator a script run talks to
///
/// A `ChatClient` is bound to one conversation (the channel or query the
/// triggering message came from). The chat-protocol client behind it lives
/// outside this crate.

use std::sync::Mutex;

pub trait ChatClient: Send + Sync {
    /// Send a message to the conversation.
    fn say(&self, message: &str);

    /// Send a message addressed to the sender of the trigger.
    fn reply(&self, message: &str);

    /// Read-only host attribute (for example the bot's own nick).
    fn attribute(&self, _name: &str) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Say(String),
    Reply(String),
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Sent::Say(text) | Sent::Reply(text) => text,
        }
    }
}

/// Collects output in memory instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct RecordingClient {
    sent: Mutex<Vec<Sent>>,
    attributes: serde_json::Map<String, serde_json::Value>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().iter().map(|s| s.text().to_string()).collect()
    }

    fn push(&self, sent: Sent) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sent);
    }
}

impl ChatClient for RecordingClient {
    fn say(&self, message: &str) {
        self.push(Sent::Say(message.to_string()));
    }

    fn reply(&self, message: &str) {
        self.push(Sent::Reply(message.to_string()));
    }

    fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes.get(name).cloned()
    }
}
