/// `scripting/error.rs` — how a failed run is reported
use thiserror::Error;

use super::mediator::{access_denied, AccessDenied};

/// Marks failures that happened before the script itself started running.
pub const SETUP_MARKER: &str = "PRE-SANDBOX ERROR: ";

#[derive(Debug, Error)]
pub enum ScriptError {
    /// VM creation, module search path or prelude loading failed.
    #[error("PRE-SANDBOX ERROR: {0}")]
    Setup(String),
    #[error("{0}")]
    Denied(AccessDenied),
    /// Syntax errors, `error(...)` calls, instruction limit, marshalling.
    #[error("{0}")]
    Runtime(String),
}

impl ScriptError {
    /// Classify an error raised while the script ran.
    pub fn from_script(err: mlua::Error) -> Self {
        if let Some(denied) = access_denied(&err) {
            return ScriptError::Denied(denied.clone());
        }
        ScriptError::Runtime(root_message(&err))
    }

    pub fn setup(err: impl std::fmt::Display) -> Self {
        ScriptError::Setup(err.to_string())
    }

    /// Text shown in the channel: everything after the setup marker, if any.
    pub fn user_message(&self) -> String {
        let text = self.to_string();
        match text.split_once(SETUP_MARKER) {
            Some((_, rest)) => rest.to_string(),
            None => text,
        }
    }
}

/// The innermost message, without mlua's traceback decoration.
fn root_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => without_traceback(msg),
        mlua::Error::SyntaxError { message, .. } => without_traceback(message),
        mlua::Error::CallbackError { cause, .. } => root_message(cause),
        mlua::Error::WithContext { cause, .. } => root_message(cause),
        mlua::Error::ExternalError(inner) => without_traceback(&inner.to_string()),
        other => without_traceback(&other.to_string()),
    }
}

/// Lua appends `stack traceback:` to errors raised inside the VM.
fn without_traceback(msg: &str) -> String {
    match msg.find("stack traceback:") {
        Some(at) => msg[..at].trim_end().to_string(),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::mediator::DenialReason;
    use std::sync::Arc;

    #[test]
    fn setup_marker_is_stripped_for_users() {
        let err = ScriptError::setup("module 'missing' not found");
        assert_eq!(err.to_string(), "PRE-SANDBOX ERROR: module 'missing' not found");
        assert_eq!(err.user_message(), "module 'missing' not found");
    }

    #[test]
    fn denials_survive_callback_wrapping() {
        let denied = AccessDenied {
            reason: DenialReason::MemberNotPermitted,
            target: "connection".into(),
        };
        let wrapped = mlua::Error::CallbackError {
            traceback: "stack traceback:".into(),
            cause: Arc::new(mlua::Error::external(denied.clone())),
        };
        match ScriptError::from_script(wrapped) {
            ScriptError::Denied(found) => assert_eq!(found, denied),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn lua_raised_errors_drop_appended_traceback() {
        let raised = mlua::Error::RuntimeError(
            "script:1: boom\nstack traceback:\n\t[C]: in ?\n\t[C]: in function 'error'\n\tscript:1: in main chunk"
                .into(),
        );
        assert_eq!(ScriptError::from_script(raised).user_message(), "script:1: boom");
    }

    #[test]
    fn errors_from_a_real_vm_are_single_line() {
        let lua = mlua::Lua::new();
        for code in ["error('boom')", "local x = nil; return x.y"] {
            let err = lua
                .load(code)
                .set_name("=script")
                .exec()
                .unwrap_err();
            let message = ScriptError::from_script(err).user_message();
            assert!(!message.contains("traceback"), "{code}: {message}");
            assert!(!message.contains('\n'), "{code}: {message}");
            assert!(message.starts_with("script:1:"), "{code}: {message}");
        }
    }

    #[test]
    fn runtime_errors_drop_tracebacks() {
        let wrapped = mlua::Error::CallbackError {
            traceback: "stack traceback:\n\t[C]: in ?".into(),
            cause: Arc::new(mlua::Error::RuntimeError("script:1: boom".into())),
        };
        let err = ScriptError::from_script(wrapped);
        assert_eq!(err.user_message(), "script:1: boom");
    }
}
