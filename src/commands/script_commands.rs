/// `commands/script_commands.rs` — chat commands that run or manage scripts
///
///   .lua <script>                         Voice+, rate limited
///   .def_cmd / .define_cmd / .define_command <name> <script>   Op+, channel only
///   .get_cmd / .get_command <name>        Op+, channel only
///   .<name> [args]                        channel command, rate limited
use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use super::{book::CommandBook, rate_limit::RateLimiter};
use crate::{
    config::BotConfig,
    db::StoreError,
    scripting::{ChatClient, ScriptError, ScriptHost, TriggerMetadata},
};

const LUA_USAGE: &str = ".lua <lua script> - Run the given lua script";
const DEFINE_USAGE: &str = ".define_cmd <name> <lua script> - Create a command based on the given lua script";
const GET_USAGE: &str = ".get_cmd <name> - Show the lua script behind a command";
const DEFINE_CHANNEL_ONLY: &str = "You must be in a channel to define a command";
const GET_CHANNEL_ONLY: &str = "You must be in a channel to use this command";

const DEFINE_COMMANDS: &[&str] = &["def_cmd", "define_cmd", "define_command"];
const GET_COMMANDS: &[&str] = &["get_cmd", "get_command"];
const LUA_COMMAND: &str = "lua";

/// Channel privilege of the sender, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    None,
    Voice,
    HalfOp,
    Op,
    Admin,
    Owner,
}

/// One incoming chat message.
#[derive(Debug, Clone)]
pub struct ChatLine {
    pub nick: String,
    pub user: String,
    pub host: String,
    /// `None` for private messages.
    pub channel: Option<String>,
    pub privilege: Privilege,
    pub text: String,
}

impl ChatLine {
    /// Where replies go: the channel, or the nick in a private message.
    pub fn sender(&self) -> &str {
        self.channel.as_deref().unwrap_or(&self.nick)
    }

    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }

    /// Snapshot of this line as seen by a script run for `command`.
    pub fn trigger(&self, command: &str, args: Option<&str>) -> TriggerMetadata {
        TriggerMetadata {
            nick: self.nick.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
            hostmask: self.hostmask(),
            sender: self.sender().to_string(),
            is_privmsg: self.channel.is_none(),
            plain: self.text.clone(),
            raw: format!(":{} PRIVMSG {} :{}", self.hostmask(), self.sender(), self.text),
            time: chrono::Utc::now().timestamp(),
            ..Default::default()
        }
        .with_command(command, args)
    }
}

/// What the dispatcher did with a line.
#[derive(Debug)]
pub enum Outcome {
    /// Not a command, or not one this dispatcher knows.
    Ignored,
    /// Sender lacks the required privilege. Nothing is said.
    NotPermitted,
    /// Dropped by the per-nick rate limit. Nothing is said.
    RateLimited,
    /// Answered directly (usage text, definitions, lookups).
    Replied,
    /// A script ran. Errors have already been reported to the conversation.
    Ran(Result<Option<String>, ScriptError>),
}

enum Route {
    Done(Outcome),
    Run(TriggerMetadata, String),
}

pub struct CommandDispatcher {
    prefix: String,
    host: Arc<ScriptHost>,
    book: CommandBook,
    limiter: RateLimiter,
}

impl CommandDispatcher {
    pub fn new(config: &BotConfig, host: Arc<ScriptHost>) -> Self {
        let book = CommandBook::new(Arc::clone(host.store()));
        Self {
            prefix: config.command_prefix.clone(),
            host,
            book,
            limiter: RateLimiter::new(Duration::from_secs(config.rate_limit_secs)),
        }
    }

    pub fn book(&self) -> &CommandBook {
        &self.book
    }

    /// Handle `line`, running any script on the current thread.
    pub fn handle(&self, line: &ChatLine, client: Arc<dyn ChatClient>) -> Outcome {
        match self.route(line, client.as_ref()) {
            Route::Done(outcome) => outcome,
            Route::Run(trigger, script) => Outcome::Ran(self.host.run(client, &trigger, &script)),
        }
    }

    /// Handle `line`, running any script on the blocking thread pool.
    pub async fn handle_async(&self, line: &ChatLine, client: Arc<dyn ChatClient>) -> Outcome {
        match self.route(line, client.as_ref()) {
            Route::Done(outcome) => outcome,
            Route::Run(trigger, script) => Outcome::Ran(
                Arc::clone(&self.host)
                    .run_blocking(client, trigger, script)
                    .await,
            ),
        }
    }

    fn route(&self, line: &ChatLine, client: &dyn ChatClient) -> Route {
        let Some(rest) = line.text.strip_prefix(self.prefix.as_str()) else {
            return Route::Done(Outcome::Ignored);
        };
        let (command, args) = match rest.split_once(char::is_whitespace) {
            Some((command, args)) => (command, Some(args.trim()).filter(|a| !a.is_empty())),
            None => (rest, None),
        };
        let command = command.to_lowercase();
        if command.is_empty() {
            return Route::Done(Outcome::Ignored);
        }

        if command == LUA_COMMAND {
            return self.lua(line, client, &command, args);
        }
        if DEFINE_COMMANDS.contains(&command.as_str()) {
            return Route::Done(self.define(line, client, args));
        }
        if GET_COMMANDS.contains(&command.as_str()) {
            return Route::Done(self.show(line, client, args));
        }
        self.custom(line, &command, args)
    }

    fn lua(
        &self,
        line: &ChatLine,
        client: &dyn ChatClient,
        command: &str,
        args: Option<&str>,
    ) -> Route {
        if line.privilege < Privilege::Voice {
            return Route::Done(Outcome::NotPermitted);
        }
        let Some(script) = args else {
            client.say(LUA_USAGE);
            return Route::Done(Outcome::Replied);
        };
        if !self.admit(line) {
            return Route::Done(Outcome::RateLimited);
        }
        Route::Run(line.trigger(command, args), script.to_string())
    }

    fn define(&self, line: &ChatLine, client: &dyn ChatClient, args: Option<&str>) -> Outcome {
        let Some(channel) = line.channel.as_deref() else {
            client.say(DEFINE_CHANNEL_ONLY);
            return Outcome::Replied;
        };
        if line.privilege < Privilege::Op {
            return Outcome::NotPermitted;
        }
        let Some((name, script)) = args
            .and_then(|a| a.split_once(char::is_whitespace))
            .map(|(name, script)| (name, script.trim()))
            .filter(|(_, script)| !script.is_empty())
        else {
            client.say(DEFINE_USAGE);
            return Outcome::Replied;
        };
        if is_builtin(&name.to_lowercase()) {
            client.say(&format!("'{name}' is a built-in command"));
            return Outcome::Replied;
        }

        match self.book.define(channel, name, script) {
            Ok(_) => client.say(&format!(
                "Successfully created new command. You should now be able to run '{name}' in {channel}"
            )),
            Err(e) => report_store_error(client, &e),
        }
        Outcome::Replied
    }

    fn show(&self, line: &ChatLine, client: &dyn ChatClient, args: Option<&str>) -> Outcome {
        let Some(channel) = line.channel.as_deref() else {
            client.say(GET_CHANNEL_ONLY);
            return Outcome::Replied;
        };
        if line.privilege < Privilege::Op {
            return Outcome::NotPermitted;
        }
        let Some(name) = args.and_then(|a| a.split_whitespace().next()) else {
            client.say(GET_USAGE);
            return Outcome::Replied;
        };

        let name = name.to_lowercase();
        match self.book.lookup(channel, &name) {
            Ok(Some(script)) => client.reply(&script),
            Ok(None) => client.reply(&format!("'{name}' does not exist")),
            Err(e) => report_store_error(client, &e),
        }
        Outcome::Replied
    }

    fn custom(&self, line: &ChatLine, command: &str, args: Option<&str>) -> Route {
        let Some(channel) = line.channel.as_deref() else {
            return Route::Done(Outcome::Ignored);
        };
        let script = match self.book.lookup(channel, command) {
            Ok(Some(script)) => script,
            Ok(None) => return Route::Done(Outcome::Ignored),
            Err(e) => {
                log::error!("[commands] lookup of '{command}' in {channel} failed: {e}");
                return Route::Done(Outcome::Ignored);
            }
        };
        if !self.admit(line) {
            return Route::Done(Outcome::RateLimited);
        }
        log::info!("[commands] {} runs '{command}' in {channel}", line.nick);
        Route::Run(line.trigger(command, args), script)
    }

    fn admit(&self, line: &ChatLine) -> bool {
        let admitted = self.limiter.try_acquire(&line.nick);
        if !admitted {
            log::debug!(
                "[commands] {} rate limited ({}s window)",
                line.nick,
                self.limiter.window().as_secs()
            );
        }
        admitted
    }
}

fn is_builtin(name: &str) -> bool {
    name == LUA_COMMAND || DEFINE_COMMANDS.contains(&name) || GET_COMMANDS.contains(&name)
}

fn report_store_error(client: &dyn ChatClient, err: &StoreError) {
    log::error!("[commands] store error: {err}");
    client.say("Could not access the command store, try again later");
}
