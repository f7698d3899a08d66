/// `scripting/api.rs` — the proxies a script run can reach
///
/// Provides the globals handed to each sandbox:
///   bot (say, reply, db), trigger (read-only snapshot), extras (str, load_json, dump_json)
///
/// Every member lookup on these objects goes through the run's `Mediator`.
/// No proxy forwards anything on its own.

use std::sync::Arc;

use mlua::{
    Function, Lua, MetaMethod, MultiValue, Result as LuaResult, Table, UserData, UserDataMethods,
    Value,
};
use serde_json::{Map, Value as Json};

use super::{
    host::ChatClient,
    marshal::{decode, display_string, encode, json_to_lua},
    mediator::{HostObject, Mediator, Owner},
    policy::{AccessPolicy, Grant, ProxyId, ProxyIds},
    quota::{Admission, OutputQuota},
    trigger::TriggerMetadata,
};
use crate::db::ValueStore;

pub const BOT_MEMBERS: &[&str] = &["say", "reply", "db"];

pub const STORE_MEMBERS: &[&str] = &[
    "get_nick_value",
    "get_channel_value",
    "get_nick_or_channel_value",
    "get_preferred_value",
];

/// A proxy whose metamethods are served by a `Mediator`.
trait Mediated: HostObject {
    fn mediator(&self) -> &Mediator;
}

fn add_mediated_methods<T, M>(methods: &mut M)
where
    T: Mediated + 'static,
    M: UserDataMethods<T>,
{
    methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
        this.mediator().get(lua, Owner::Host(this), &key)
    });
    methods.add_meta_method(
        MetaMethod::NewIndex,
        |_, this, (key, _value): (Value, Value)| this.mediator().set(Owner::Host(this), &key),
    );
    methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
        Ok(this.label().to_string())
    });
}

// ── bot ───────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BotProxy {
    id: ProxyId,
    mediator: Mediator,
    client: Arc<dyn ChatClient>,
    quota: Arc<OutputQuota>,
    /// Sent once when the quota runs out.
    notice: Arc<str>,
    store: StoreProxy,
}

impl BotProxy {
    pub fn new(
        id: ProxyId,
        mediator: Mediator,
        client: Arc<dyn ChatClient>,
        quota: OutputQuota,
        notice: &str,
        store: StoreProxy,
    ) -> Self {
        Self {
            id,
            mediator,
            client,
            quota: Arc::new(quota),
            notice: Arc::from(notice),
            store,
        }
    }

    /// Say `message` in the conversation, subject to the quota.
    pub fn emit(&self, message: &str) -> i64 {
        self.send(message, |client, text| client.say(text))
    }

    /// Reply to the trigger's sender, subject to the quota.
    pub fn emit_reply(&self, message: &str) -> i64 {
        self.send(message, |client, text| client.reply(text))
    }

    fn send(&self, message: &str, deliver: fn(&dyn ChatClient, &str)) -> i64 {
        let (admission, remaining) = self.quota.admit();
        match admission {
            Admission::Deliver => deliver(self.client.as_ref(), message),
            Admission::Notice => self.client.say(&self.notice),
            Admission::Muted => log::debug!("[script] output muted ({remaining})"),
        }
        remaining
    }

    fn bound(&self, lua: &Lua, deliver: fn(&BotProxy, &str) -> i64) -> LuaResult<Value> {
        let this = self.clone();
        let f = lua.create_function(move |_, args: MultiValue| {
            let args = call_args::<BotProxy>(args);
            let message = display_string(args.first().unwrap_or(&Value::Nil))?;
            Ok(deliver(&this, &message))
        })?;
        Ok(Value::Function(f))
    }
}

impl HostObject for BotProxy {
    fn identity(&self) -> ProxyId {
        self.id
    }

    fn label(&self) -> &'static str {
        "bot"
    }

    fn resolve(&self, lua: &Lua, name: &str) -> LuaResult<Option<Value>> {
        match name {
            "say" => self.bound(lua, BotProxy::emit).map(Some),
            "reply" => self.bound(lua, BotProxy::emit_reply).map(Some),
            "db" => Ok(Some(Value::UserData(lua.create_userdata(self.store.clone())?))),
            // Host attributes the proxy does not define itself. The mediator has
            // already checked the name against the policy.
            other => match self.client.attribute(other) {
                Some(value) => json_to_lua(lua, &value).map(Some),
                None => Ok(None),
            },
        }
    }
}

impl Mediated for BotProxy {
    fn mediator(&self) -> &Mediator {
        &self.mediator
    }
}

impl UserData for BotProxy {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_mediated_methods(methods);
    }
}

// ── store ─────────────────────────────────────────────────────────────────────

/// Read-only view of the key/value store.
#[derive(Clone)]
pub struct StoreProxy {
    id: ProxyId,
    mediator: Mediator,
    store: Arc<dyn ValueStore>,
}

impl StoreProxy {
    pub fn new(id: ProxyId, mediator: Mediator, store: Arc<dyn ValueStore>) -> Self {
        Self {
            id,
            mediator,
            store,
        }
    }

    fn lookup(&self, name: &str, args: &[Value]) -> LuaResult<Option<Json>> {
        let result = match name {
            "get_nick_value" => self
                .store
                .get_nick_value(&string_arg(args, 0, name)?, &string_arg(args, 1, name)?),
            "get_channel_value" => self
                .store
                .get_channel_value(&string_arg(args, 0, name)?, &string_arg(args, 1, name)?),
            "get_nick_or_channel_value" => self
                .store
                .get_nick_or_channel_value(&string_arg(args, 0, name)?, &string_arg(args, 1, name)?),
            "get_preferred_value" => self
                .store
                .get_preferred_value(&names_arg(args, 0, name)?, &string_arg(args, 1, name)?),
            _ => return Ok(None),
        };
        result.map_err(mlua::Error::external)
    }
}

impl HostObject for StoreProxy {
    fn identity(&self) -> ProxyId {
        self.id
    }

    fn label(&self) -> &'static str {
        "db"
    }

    fn resolve(&self, lua: &Lua, name: &str) -> LuaResult<Option<Value>> {
        if !STORE_MEMBERS.contains(&name) {
            return Ok(None);
        }
        let this = self.clone();
        let member = name.to_string();
        let f = lua.create_function(move |lua, args: MultiValue| {
            let args = call_args::<StoreProxy>(args);
            match this.lookup(&member, &args)? {
                Some(value) => json_to_lua(lua, &value),
                None => Ok(Value::Nil),
            }
        })?;
        Ok(Some(Value::Function(f)))
    }
}

impl Mediated for StoreProxy {
    fn mediator(&self) -> &Mediator {
        &self.mediator
    }
}

impl UserData for StoreProxy {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_mediated_methods(methods);
    }
}

// ── extras ────────────────────────────────────────────────────────────────────

/// Pure value helpers. Holds no host authority.
#[derive(Clone)]
pub struct UtilityProxy {
    id: ProxyId,
    mediator: Mediator,
}

impl UtilityProxy {
    pub fn new(id: ProxyId, mediator: Mediator) -> Self {
        Self { id, mediator }
    }
}

impl HostObject for UtilityProxy {
    fn identity(&self) -> ProxyId {
        self.id
    }

    fn label(&self) -> &'static str {
        "extras"
    }

    fn resolve(&self, lua: &Lua, name: &str) -> LuaResult<Option<Value>> {
        let f = match name {
            "str" => lua.create_function(|lua, args: MultiValue| {
                let args = call_args::<UtilityProxy>(args);
                let text = display_string(args.first().unwrap_or(&Value::Nil))?;
                lua.create_string(text)
            })?,
            "load_json" => lua.create_function(|lua, args: MultiValue| {
                let args = call_args::<UtilityProxy>(args);
                Ok(decode(lua, &string_arg(&args, 0, "load_json")?)?)
            })?,
            "dump_json" => lua.create_function(|_, args: MultiValue| {
                let args = call_args::<UtilityProxy>(args);
                Ok(encode(args.first().unwrap_or(&Value::Nil))?)
            })?,
            _ => return Ok(None),
        };
        Ok(Some(Value::Function(f)))
    }
}

impl Mediated for UtilityProxy {
    fn mediator(&self) -> &Mediator {
        &self.mediator
    }
}

impl UserData for UtilityProxy {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        add_mediated_methods(methods);
    }
}

// ── trigger ───────────────────────────────────────────────────────────────────

/// Read-only container over a `TriggerMetadata` snapshot.
pub struct TriggerView {
    mediator: Mediator,
    snapshot: Map<String, Json>,
}

impl TriggerView {
    pub fn new(mediator: Mediator, trigger: &TriggerMetadata) -> Self {
        Self {
            mediator,
            snapshot: trigger.snapshot(),
        }
    }
}

impl UserData for TriggerView {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            this.mediator.get(lua, Owner::Container(&this.snapshot), &key)
        });
        methods.add_meta_method(
            MetaMethod::NewIndex,
            |_, this, (key, _value): (Value, Value)| {
                this.mediator.set(Owner::Container(&this.snapshot), &key)
            },
        );
        methods.add_meta_method(MetaMethod::Pairs, |lua, this, ()| {
            let copy = json_to_lua(lua, &Json::Object(this.snapshot.clone()))?;
            let next: Function = lua.globals().get("next")?;
            Ok((next, copy, Value::Nil))
        });
        methods.add_meta_method(MetaMethod::ToString, |_, _, ()| Ok("trigger"));
    }
}

// ── assembly ──────────────────────────────────────────────────────────────────

/// The proxies of one run, sharing one frozen policy.
pub struct Proxies {
    pub bot: BotProxy,
    pub trigger: TriggerView,
    pub extras: UtilityProxy,
}

impl Proxies {
    pub fn build(
        client: Arc<dyn ChatClient>,
        store: Arc<dyn ValueStore>,
        trigger: &TriggerMetadata,
        quota: OutputQuota,
        notice: &str,
    ) -> Self {
        let mut ids = ProxyIds::new();
        let bot_id = ids.allocate();
        let store_id = ids.allocate();
        let extras_id = ids.allocate();

        let mut policy = AccessPolicy::new();
        policy.register(bot_id, Grant::from_names(BOT_MEMBERS.iter().copied()));
        policy.register(store_id, Grant::from_names(STORE_MEMBERS.iter().copied()));
        policy.register(extras_id, Grant::All);
        let mediator = Mediator::new(Arc::new(policy));

        let db = StoreProxy::new(store_id, mediator.clone(), store);
        Self {
            bot: BotProxy::new(bot_id, mediator.clone(), client, quota, notice, db),
            trigger: TriggerView::new(mediator.clone(), trigger),
            extras: UtilityProxy::new(extras_id, mediator),
        }
    }

    /// `{bot, trigger, extras}` as handed to `protect`.
    pub fn environment(self, lua: &Lua) -> LuaResult<Table> {
        let env = lua.create_table()?;
        env.set("bot", lua.create_userdata(self.bot)?)?;
        env.set("trigger", lua.create_userdata(self.trigger)?)?;
        env.set("extras", lua.create_userdata(self.extras)?)?;
        Ok(env)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Arguments with the receiver dropped, so `bot:say(x)` and `bot.say(x)` agree.
fn call_args<T: 'static>(args: MultiValue) -> Vec<Value> {
    let mut args: Vec<Value> = args.into_iter().collect();
    if matches!(args.first(), Some(Value::UserData(ud)) if ud.is::<T>()) {
        args.remove(0);
    }
    args
}

fn string_arg(args: &[Value], index: usize, func: &str) -> LuaResult<String> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.to_string_lossy()),
        Some(Value::Integer(i)) => Ok(i.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        other => Err(mlua::Error::RuntimeError(format!(
            "bad argument #{} to '{}' (string expected, got {})",
            index + 1,
            func,
            other.map(Value::type_name).unwrap_or("no value")
        ))),
    }
}

/// A single name or a sequence of names.
fn names_arg(args: &[Value], index: usize, func: &str) -> LuaResult<Vec<String>> {
    match args.get(index) {
        Some(Value::Table(t)) => t
            .clone()
            .sequence_values::<String>()
            .collect::<LuaResult<Vec<_>>>(),
        _ => Ok(vec![string_arg(args, index, func)?]),
    }
}
