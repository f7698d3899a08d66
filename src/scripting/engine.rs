/// `scripting/engine.rs` — one script run, start to finish
///
/// `ScriptHost` owns the process-wide pieces (sandbox settings, module search
/// path, value store). Everything else is built per run: policy, proxies,
/// quota and a fresh Lua VM. Failures are reported to the conversation once
/// and never escape as panics.

use std::{fs, sync::Arc};

use mlua::{Function, Lua, Table, Value};

use super::{
    api::Proxies,
    error::ScriptError,
    host::ChatClient,
    marshal::display_string,
    quota::OutputQuota,
    sandbox::{create_sandboxed_vm, ModuleSearchPath, WorkdirGuard, SANDBOX_MODULE},
    trigger::TriggerMetadata,
};
use crate::{
    config::{ConfigError, SandboxConfig},
    db::ValueStore,
};

pub struct ScriptHost {
    config: Arc<SandboxConfig>,
    search_path: ModuleSearchPath,
    store: Arc<dyn ValueStore>,
}

impl ScriptHost {
    pub fn new(config: SandboxConfig, store: Arc<dyn ValueStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let search_path = ModuleSearchPath::new(&config.module_dirs)
            .map_err(|e| ConfigError::Invalid(format!("module search path: {e}")))?;
        if let Some(dir) = &config.sandbox_dir {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
        }
        log::info!(
            "[sandbox] module path: {}",
            if search_path.dirs().is_empty() {
                "(none)".to_string()
            } else {
                search_path.package_path()
            }
        );
        Ok(Self {
            config: Arc::new(config),
            search_path,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn ValueStore> {
        &self.store
    }

    /// Run `script` on behalf of `trigger`, talking to `client`.
    ///
    /// A returned value that is not `nil`, `false` or `""` is said once,
    /// subject to the quota. On failure the error is said with the error
    /// prefix, bypassing the quota, and also returned.
    pub fn run(
        &self,
        client: Arc<dyn ChatClient>,
        trigger: &TriggerMetadata,
        script: &str,
    ) -> Result<Option<String>, ScriptError> {
        let proxies = Proxies::build(
            Arc::clone(&client),
            Arc::clone(&self.store),
            trigger,
            OutputQuota::new(self.config.message_quota),
            &self.config.quota_notice(),
        );
        let bot = proxies.bot.clone();

        log::debug!("[script] run for {} in {}", trigger.nick, trigger.sender);
        match self.execute(proxies, script) {
            Ok(Some(text)) => {
                bot.emit(&text);
                Ok(Some(text))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                log::warn!("[script] run for {} failed: {err}", trigger.nick);
                client.say(&format!("{}{}", self.config.error_prefix, err.user_message()));
                Err(err)
            }
        }
    }

    /// `run` on the blocking thread pool (Lua is synchronous).
    pub async fn run_blocking(
        self: Arc<Self>,
        client: Arc<dyn ChatClient>,
        trigger: TriggerMetadata,
        script: String,
    ) -> Result<Option<String>, ScriptError> {
        tokio::task::spawn_blocking(move || self.run(client, &trigger, &script))
            .await
            .unwrap_or_else(|e| Err(ScriptError::Setup(format!("script task panicked: {e}"))))
    }

    fn execute(&self, proxies: Proxies, script: &str) -> Result<Option<String>, ScriptError> {
        let _workdir = match &self.config.sandbox_dir {
            Some(dir) => Some(WorkdirGuard::enter(dir).map_err(ScriptError::setup)?),
            None => None,
        };

        let lua = create_sandboxed_vm(&self.search_path).map_err(ScriptError::setup)?;
        let protect = self.load_protect(&lua).map_err(ScriptError::setup)?;

        let options = lua.create_table().map_err(ScriptError::setup)?;
        let env = proxies.environment(&lua).map_err(ScriptError::setup)?;
        options.set("env", env).map_err(ScriptError::setup)?;
        if let Some(limit) = self.config.instruction_limit {
            options
                .set("instructions", limit)
                .map_err(ScriptError::setup)?;
        }

        let protected: Function = protect
            .call((script, options))
            .map_err(ScriptError::from_script)?;
        let value: Value = protected.call(()).map_err(ScriptError::from_script)?;
        result_text(&value)
    }

    /// Prelude modules first, so they can extend the libraries the sandbox copies.
    fn load_protect(&self, lua: &Lua) -> mlua::Result<Function> {
        let require: Function = lua.globals().get("require")?;
        for module in &self.config.prelude {
            require.call::<Value>(module.as_str())?;
        }
        let sandbox: Table = require.call(SANDBOX_MODULE)?;
        sandbox.get("protect")
    }
}

fn result_text(value: &Value) -> Result<Option<String>, ScriptError> {
    match value {
        Value::Nil | Value::Boolean(false) => Ok(None),
        Value::String(s) if s.as_bytes().is_empty() => Ok(None),
        other => display_string(other)
            .map(Some)
            .map_err(|e| ScriptError::Runtime(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::scripting::host::{RecordingClient, Sent};
    use crate::scripting::mediator::DenialReason;
    use serde_json::json;
    use std::env;

    fn host_with(config: SandboxConfig) -> ScriptHost {
        ScriptHost::new(config, Arc::new(MemoryStore::new())).expect("host")
    }

    fn host() -> ScriptHost {
        host_with(SandboxConfig::default())
    }

    fn trigger() -> TriggerMetadata {
        TriggerMetadata {
            nick: "alice".into(),
            sender: "#lobby".into(),
            plain: ".lua script".into(),
            ..Default::default()
        }
    }

    fn run(host: &ScriptHost, script: &str) -> (Result<Option<String>, ScriptError>, Vec<String>) {
        let client = Arc::new(RecordingClient::new());
        let result = host.run(client.clone(), &trigger(), script);
        (result, client.texts())
    }

    #[test]
    fn say_reaches_the_conversation() {
        let (result, sent) = run(&host(), r#"bot.say("hi")"#);
        assert!(matches!(result, Ok(None)));
        assert_eq!(sent, vec!["hi"]);
    }

    #[test]
    fn return_value_is_said_once() {
        let host = host();
        let (result, sent) = run(&host, "return 1 + 1");
        assert_eq!(result.unwrap().as_deref(), Some("2"));
        assert_eq!(sent, vec!["2"]);

        for quiet in ["return nil", "return false", "return ''", "local x = 1"] {
            let (result, sent) = run(&host, quiet);
            assert!(matches!(result, Ok(None)), "{quiet}");
            assert!(sent.is_empty(), "{quiet}");
        }
    }

    #[test]
    fn eleven_says_give_ten_messages_and_a_notice() {
        let (_, sent) = run(&host(), r#"for i = 1, 11 do bot.say("m" .. i) end"#);
        assert_eq!(sent.len(), 11);
        assert_eq!(sent[9], "m10");
        assert_eq!(sent[10], "[lua] error: message quota exceeded");

        let (_, sent) = run(&host(), r#"for i = 1, 50 do bot:say(i) end"#);
        assert_eq!(sent.len(), 11);
    }

    #[test]
    fn return_value_counts_against_the_quota() {
        let (_, sent) = run(&host(), r#"for i = 1, 10 do bot.say(i) end return "late""#);
        assert_eq!(sent.len(), 11);
        assert_eq!(sent[10], "[lua] error: message quota exceeded");
    }

    #[test]
    fn quota_is_fresh_for_every_run() {
        let host = host();
        let script = r#"local left for i = 1, 12 do left = bot.say("x") end return tostring(left)"#;
        let (_, first) = run(&host, script);
        let (_, second) = run(&host, script);
        assert_eq!(first.len(), 11);
        assert_eq!(first, second);
    }

    #[test]
    fn reply_goes_to_the_sender() {
        let client = Arc::new(RecordingClient::new());
        host().run(client.clone(), &trigger(), r#"bot:reply("pong")"#).unwrap();
        assert_eq!(client.sent(), vec![Sent::Reply("pong".into())]);
    }

    #[test]
    fn disallowed_member_is_reported_once_and_the_next_run_works() {
        let host = host();
        let (result, sent) = run(&host, "bot.say('before') return bot.connection");
        match result {
            Err(ScriptError::Denied(denied)) => {
                assert_eq!(denied.reason, DenialReason::MemberNotPermitted);
                assert_eq!(denied.target, "connection");
            }
            other => panic!("expected denial, got {other:?}"),
        }
        assert_eq!(
            sent,
            vec![
                "before".to_string(),
                "[lua] error: permission denied 'connection' (member not permitted)".to_string(),
            ]
        );

        let (result, sent) = run(&host, "bot.say('after')");
        assert!(result.is_ok());
        assert_eq!(sent, vec!["after"]);
    }

    #[test]
    fn pcall_catches_denials() {
        let script = r#"
            local ok = pcall(function() return bot.connection end)
            if not ok then bot.say("caught") end
        "#;
        let (result, sent) = run(&host(), script);
        assert!(result.is_ok());
        assert_eq!(sent, vec!["caught"]);
    }

    #[test]
    fn runtime_error_has_no_traceback() {
        let (result, sent) = run(&host(), r#"error("boom")"#);
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("[lua] error: "));
        assert!(sent[0].contains("boom"));
        assert!(!sent[0].contains("traceback"));
    }

    #[test]
    fn syntax_error_restores_working_directory() {
        let workdir = tempfile::tempdir().unwrap();
        let target = workdir.path().canonicalize().unwrap();
        let host = host_with(SandboxConfig {
            sandbox_dir: Some(workdir.path().to_path_buf()),
            ..Default::default()
        });

        let (result, sent) = run(&host, "bot.say(");
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("[lua] error: "));
        assert!(!sent[0].contains("PRE-SANDBOX"));
        assert_ne!(env::current_dir().unwrap().canonicalize().unwrap(), target);

        let (result, sent) = run(&host, "bot.say('ok')");
        assert!(result.is_ok());
        assert_eq!(sent, vec!["ok"]);
    }

    #[test]
    fn prelude_extends_the_string_library() {
        let modules = tempfile::tempdir().unwrap();
        fs::write(
            modules.path().join("shout.lua"),
            "function string.shout(s) return s:upper() .. '!' end\nreturn true\n",
        )
        .unwrap();
        let host = host_with(SandboxConfig {
            module_dirs: vec![modules.path().to_path_buf()],
            prelude: vec!["shout".into()],
            ..Default::default()
        });

        let (_, sent) = run(&host, r#"bot.say(string.shout("hi")) return ("yo"):shout()"#);
        assert_eq!(sent, vec!["HI!", "YO!"]);
    }

    #[test]
    fn missing_prelude_is_a_setup_error() {
        let host = host_with(SandboxConfig {
            prelude: vec!["missing_module".into()],
            ..Default::default()
        });
        let (result, sent) = run(&host, "bot.say('never')");
        assert!(matches!(result, Err(ScriptError::Setup(_))));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("[lua] error: "));
        assert!(sent[0].contains("missing_module"));
        assert!(!sent[0].contains("PRE-SANDBOX"));
    }

    #[test]
    fn scripts_cannot_load_modules_or_print() {
        let host = host();
        let (result, _) = run(&host, "return require('os')");
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        let (result, _) = run(&host, "print('hi')");
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
    }

    #[test]
    fn instruction_limit_ends_the_run() {
        let host = host_with(SandboxConfig {
            instruction_limit: Some(10_000),
            ..Default::default()
        });
        let (result, sent) = run(&host, "while true do end");
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        assert!(sent[0].contains("instruction limit exceeded"));
    }

    #[test]
    fn scripts_read_the_store() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_channel_value("#lobby", "greeting", json!("welcome"))
            .unwrap();
        let host = ScriptHost::new(SandboxConfig::default(), store).unwrap();
        let (_, sent) = run(
            &host,
            r#"return bot.db.get_channel_value(trigger.sender, "greeting") .. ", " .. trigger.nick"#,
        );
        assert_eq!(sent, vec!["welcome, alice"]);
    }

    #[test]
    fn unencodable_result_is_a_runtime_error() {
        let (result, sent) = run(&host(), "return function() end");
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn run_blocking_moves_work_off_the_runtime() {
        let host = Arc::new(host());
        let client = Arc::new(RecordingClient::new());
        let result = host
            .run_blocking(client.clone(), trigger(), "return 'async'".to_string())
            .await;
        assert_eq!(result.unwrap().as_deref(), Some("async"));
        assert_eq!(client.texts(), vec!["async"]);
    }
}
