/// `console.rs` — drive the bot from a terminal
///
/// Each stdin line is treated as a chat message from one configured nick in
/// one configured channel (or a private message). Bot output is printed.
use std::{
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    commands::{ChatLine, Outcome, Privilege},
    config::BotConfig,
    scripting::{ChatClient, TriggerMetadata},
    state::{BotState, StartupError},
};

#[derive(Parser, Debug)]
#[command(about = "Run sandboxed Lua chat commands from a terminal", version)]
pub struct Args {
    /// JSON config file; defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bot nick (overrides the config file)
    #[arg(long)]
    pub bot_nick: Option<String>,

    /// Nick the typed lines come from
    #[arg(long, default_value = "console")]
    pub nick: String,

    /// Channel the typed lines are sent to
    #[arg(long, default_value = "#console")]
    pub channel: String,

    /// Send typed lines as private messages instead
    #[arg(long)]
    pub privmsg: bool,

    /// Channel privilege of the sending nick
    #[arg(long, value_enum, default_value_t = Privilege::Op)]
    pub privilege: Privilege,

    /// JSON file backing the value store (overrides the config file)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Extra vetted module directory; may be repeated
    #[arg(long = "module-dir")]
    pub module_dirs: Vec<PathBuf>,

    /// Run this script once and exit instead of reading stdin
    #[arg(long)]
    pub script: Option<String>,
}

impl Args {
    /// The config file (or defaults) with command-line overrides applied.
    pub fn bot_config(&self) -> Result<BotConfig, StartupError> {
        let mut config = match &self.config {
            Some(path) => BotConfig::load(path)?,
            None => BotConfig::default(),
        };
        if let Some(nick) = &self.bot_nick {
            config.nick = nick.clone();
        }
        if let Some(db) = &self.db {
            config.db_path = Some(db.clone());
        }
        config.sandbox.module_dirs.extend(self.module_dirs.iter().cloned());
        config.validate()?;
        Ok(config)
    }

    /// Trigger for a `--script` run, laid out as if typed as `.lua <script>`.
    fn script_trigger(&self, script: &str) -> TriggerMetadata {
        self.chat_line(script).trigger("lua", Some(script))
    }

    fn chat_line(&self, text: &str) -> ChatLine {
        ChatLine {
            nick: self.nick.clone(),
            user: self.nick.clone(),
            host: "console".to_string(),
            channel: (!self.privmsg).then(|| self.channel.clone()),
            privilege: self.privilege,
            text: text.to_string(),
        }
    }
}

/// Prints bot output as `<nick> message`.
pub struct ConsoleClient {
    bot_nick: String,
    /// Addressee for replies.
    sender: String,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleClient {
    pub fn new(bot_nick: &str, sender: &str, out: Box<dyn Write + Send>) -> Self {
        Self {
            bot_nick: bot_nick.to_string(),
            sender: sender.to_string(),
            out: Mutex::new(out),
        }
    }

    fn print(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "<{}> {}", self.bot_nick, text) {
            log::error!("[console] write failed: {e}");
        }
    }
}

impl ChatClient for ConsoleClient {
    fn say(&self, message: &str) {
        self.print(message);
    }

    fn reply(&self, message: &str) {
        self.print(&format!("{}: {}", self.sender, message));
    }

    fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "nick" => Some(serde_json::Value::String(self.bot_nick.clone())),
            _ => None,
        }
    }
}

/// Entry point of the `chat-lua` binary.
pub fn run(args: Args) -> Result<(), StartupError> {
    let config = args.bot_config()?;
    let state = BotState::from_config(config)?;
    log::info!(
        "[console] {} ready, speaking as {} ({:?})",
        state.config.nick,
        args.nick,
        args.privilege
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args, state))
}

async fn serve(args: Args, state: BotState) -> Result<(), StartupError> {
    let client: Arc<dyn ChatClient> = Arc::new(ConsoleClient::new(
        &state.config.nick,
        &args.nick,
        Box::new(std::io::stdout()),
    ));

    if let Some(script) = &args.script {
        let trigger = args.script_trigger(script);
        // Errors were already printed through the client.
        let _ = Arc::clone(&state.host)
            .run_blocking(client, trigger, script.clone())
            .await;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(text) = lines.next_line().await? {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let outcome = state
            .dispatcher
            .handle_async(&args.chat_line(text), Arc::clone(&client))
            .await;
        match outcome {
            Outcome::NotPermitted => log::info!("[console] not permitted: {text}"),
            Outcome::RateLimited => log::info!("[console] rate limited: {text}"),
            _ => {}
        }
    }
    Ok(())
}
