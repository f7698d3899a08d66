/// `scripting/` — sandboxed Lua scripts for the chat bot
///
/// Each run gets its own Lua VM (mlua), its own access policy and its own
/// message quota. Scripts only see the `bot`, `trigger` and `extras` proxies;
/// every member access on them is checked by the mediator.
/// Script errors are reported to the conversation, never propagated as panics.
pub mod api;
pub mod engine;
pub mod error;
pub mod host;
pub mod marshal;
pub mod mediator;
pub mod policy;
pub mod quota;
pub mod sandbox;
pub mod trigger;

pub use engine::ScriptHost;
pub use error::ScriptError;
pub use host::ChatClient;
pub use trigger::TriggerMetadata;
