/// `scripting/trigger.rs` — snapshot of the message that fired a script
///
/// Scripts see this as the read-only `trigger` global. It is plain data taken
/// before the run starts, so nothing in it reaches back into the chat client.
use serde::{Deserialize, Serialize};

/// Argument words copied into `groups[4..7]`.
const ARG_GROUPS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub hostmask: String,
    /// Channel the message arrived in, or the nick for private messages.
    pub sender: String,
    pub is_privmsg: bool,
    /// Message text without formatting.
    pub plain: String,
    /// The raw protocol line, when the client has one.
    pub raw: String,
    /// Full text, command, argument string, then the first four argument words.
    pub groups: Vec<Option<String>>,
    pub args: Vec<String>,
    /// Unix timestamp of the message.
    pub time: i64,
}

impl TriggerMetadata {
    /// Build the capture groups for a `<prefix><command> <args>` line.
    pub fn with_command(mut self, command: &str, args: Option<&str>) -> Self {
        let args = args.map(str::trim).filter(|a| !a.is_empty());
        let words: Vec<String> = args
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let mut groups = vec![
            Some(self.plain.clone()),
            Some(command.to_string()),
            args.map(str::to_string),
        ];
        for i in 0..ARG_GROUPS {
            groups.push(words.get(i).cloned());
        }
        self.groups = groups;
        self.args = words;
        self
    }

    /// The snapshot as a JSON object. Absent groups become `null`.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}
