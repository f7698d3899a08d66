/// `scripting/mediator.rs` — the get/set checkpoint every script access passes
///
/// Proxies route their `__index` and `__newindex` metamethods here. Reads are
/// checked against the run's `AccessPolicy` plus a private-name filter; writes
/// are refused outright apart from the reserved global-table name.

use std::sync::Arc;

use mlua::{Lua, Result as LuaResult, Value};
use serde_json::{Map, Value as Json};

use super::{
    marshal::json_to_lua,
    policy::{AccessPolicy, ProxyId},
};

/// Names starting with this are never readable, `_G` aside.
pub const PRIVATE_PREFIX: char = '_';

/// The one name scripts may write through a mediated object.
pub const GLOBAL_TABLE: &str = "_G";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NonStringName,
    Private,
    ObjectNotPermitted,
    MemberNotPermitted,
    WriteDenied,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::NonStringName => "non-string member name",
            DenialReason::Private => "private member",
            DenialReason::ObjectNotPermitted => "object not permitted",
            DenialReason::MemberNotPermitted => "member not permitted",
            DenialReason::WriteDenied => "write not permitted",
        }
    }
}

/// Raised into Lua as a regular error, so `pcall` can catch it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("permission denied '{target}' ({})", .reason.as_str())]
pub struct AccessDenied {
    pub reason: DenialReason,
    /// Attempted member name, or the owner label for object-level denials.
    pub target: String,
}

/// A host-side object whose members are reachable only through the mediator.
pub trait HostObject {
    fn identity(&self) -> ProxyId;

    /// Short name used in log lines and error messages.
    fn label(&self) -> &'static str;

    /// Produce the real member value. `None` when the object has no such member.
    fn resolve(&self, lua: &Lua, name: &str) -> LuaResult<Option<Value>>;
}

pub enum Owner<'a> {
    /// Inert structured data. Looked up by key, no policy involved.
    Container(&'a Map<String, Json>),
    Host(&'a dyn HostObject),
}

#[derive(Debug, Clone)]
pub struct Mediator {
    policy: Arc<AccessPolicy>,
}

impl Mediator {
    pub fn new(policy: Arc<AccessPolicy>) -> Self {
        Self { policy }
    }

    pub fn get(&self, lua: &Lua, owner: Owner<'_>, key: &Value) -> LuaResult<Value> {
        let host = match owner {
            Owner::Container(map) => return container_lookup(lua, map, key),
            Owner::Host(host) => host,
        };

        let name = match member_name(key) {
            Some(name) => name,
            None => return Err(deny(DenialReason::NonStringName, key.type_name())),
        };

        if is_private(&name) {
            return Err(deny(DenialReason::Private, &name));
        }
        if !self.policy.is_registered(host.identity()) {
            return Err(deny(DenialReason::ObjectNotPermitted, host.label()));
        }
        if !self.policy.is_allowed(host.identity(), &name) {
            return Err(deny(DenialReason::MemberNotPermitted, &name));
        }

        log::debug!("[sandbox] accessing {}.{}", host.label(), name);
        match host.resolve(lua, &name)? {
            Some(value) => Ok(value),
            None => Err(mlua::Error::RuntimeError(format!(
                "'{}' object has no attribute '{}'",
                host.label(),
                name
            ))),
        }
    }

    /// Writes never depend on the policy. Only `_G` gets through.
    pub fn set(&self, owner: Owner<'_>, key: &Value) -> LuaResult<()> {
        let name = member_name(key);
        match name.as_deref() {
            Some(GLOBAL_TABLE) => {
                let label = match owner {
                    Owner::Container(_) => "container",
                    Owner::Host(host) => host.label(),
                };
                log::debug!("[sandbox] accepted {GLOBAL_TABLE} assignment on {label}");
                Ok(())
            }
            Some(name) => Err(deny(DenialReason::WriteDenied, name)),
            None => Err(deny(DenialReason::WriteDenied, key.type_name())),
        }
    }
}

/// Find an `AccessDenied` anywhere in an mlua error chain.
pub fn access_denied(err: &mlua::Error) -> Option<&AccessDenied> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<AccessDenied>(),
        mlua::Error::CallbackError { cause, .. } => access_denied(cause),
        mlua::Error::WithContext { cause, .. } => access_denied(cause),
        _ => None,
    }
}

fn deny(reason: DenialReason, target: &str) -> mlua::Error {
    let denied = AccessDenied {
        reason,
        target: target.to_string(),
    };
    log::warn!("[sandbox] {denied}");
    mlua::Error::external(denied)
}

fn member_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => s.to_str().ok().map(|s| s.to_string()),
        _ => None,
    }
}

fn is_private(name: &str) -> bool {
    name.starts_with(PRIVATE_PREFIX) && name != GLOBAL_TABLE
}

fn container_lookup(lua: &Lua, map: &Map<String, Json>, key: &Value) -> LuaResult<Value> {
    let found = match key {
        Value::String(s) => map.get(s.to_string_lossy().as_str()),
        Value::Integer(i) => map.get(&i.to_string()),
        _ => None,
    };
    match found {
        Some(value) => json_to_lua(lua, value),
        None => Ok(Value::Nil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::policy::{Grant, ProxyIds};

    struct Probe {
        id: ProxyId,
    }

    impl HostObject for Probe {
        fn identity(&self) -> ProxyId {
            self.id
        }

        fn label(&self) -> &'static str {
            "probe"
        }

        fn resolve(&self, lua: &Lua, name: &str) -> LuaResult<Option<Value>> {
            match name {
                "a" | "b" | "_G" | "hidden" => {
                    Ok(Some(Value::String(lua.create_string(name)?)))
                }
                _ => Ok(None),
            }
        }
    }

    fn key(lua: &Lua, name: &str) -> Value {
        Value::String(lua.create_string(name).expect("create key"))
    }

    fn setup(grant: Option<Grant>) -> (Lua, Mediator, Probe) {
        let mut ids = ProxyIds::new();
        let probe = Probe { id: ids.allocate() };
        let mut policy = AccessPolicy::new();
        if let Some(grant) = grant {
            policy.register(probe.id, grant);
        }
        (Lua::new(), Mediator::new(Arc::new(policy)), probe)
    }

    fn reason_of(err: mlua::Error) -> DenialReason {
        access_denied(&err).expect("expected a denial").reason
    }

    #[test]
    fn listed_members_resolve() {
        let (lua, mediator, probe) = setup(Some(Grant::from_names(["a", "b"])));
        for name in ["a", "b"] {
            let value = mediator
                .get(&lua, Owner::Host(&probe), &key(&lua, name))
                .expect("allowed member");
            assert_eq!(value.as_str().as_deref(), Some(name));
        }
    }

    #[test]
    fn unlisted_member_is_denied() {
        let (lua, mediator, probe) = setup(Some(Grant::from_names(["a", "b"])));
        let err = mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "hidden"))
            .unwrap_err();
        assert_eq!(reason_of(err), DenialReason::MemberNotPermitted);
    }

    #[test]
    fn private_names_denied_even_with_wildcard() {
        let (lua, mediator, probe) = setup(Some(Grant::All));
        let err = mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "__index"))
            .unwrap_err();
        assert_eq!(reason_of(err), DenialReason::Private);

        // The reserved global name passes the private filter.
        let value = mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "_G"))
            .expect("_G is not private");
        assert_eq!(value.as_str().as_deref(), Some("_G"));
    }

    #[test]
    fn wildcard_allows_any_public_name() {
        let (lua, mediator, probe) = setup(Some(Grant::All));
        assert!(mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "hidden"))
            .is_ok());

        // Permitted but undefined members are an ordinary error, not a denial.
        let err = mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "missing"))
            .unwrap_err();
        assert!(access_denied(&err).is_none());
        assert!(err.to_string().contains("has no attribute 'missing'"));
    }

    #[test]
    fn unregistered_object_is_denied() {
        let (lua, mediator, probe) = setup(None);
        let err = mediator
            .get(&lua, Owner::Host(&probe), &key(&lua, "a"))
            .unwrap_err();
        let denied = access_denied(&err).expect("denial");
        assert_eq!(denied.reason, DenialReason::ObjectNotPermitted);
        assert_eq!(denied.target, "probe");
    }

    #[test]
    fn non_string_names_are_denied() {
        let (lua, mediator, probe) = setup(Some(Grant::All));
        let err = mediator
            .get(&lua, Owner::Host(&probe), &Value::Integer(1))
            .unwrap_err();
        assert_eq!(reason_of(err), DenialReason::NonStringName);
    }

    #[test]
    fn containers_bypass_the_policy() {
        let (lua, mediator, _) = setup(None);
        let map = serde_json::json!({ "nick": "alice", "_raw": "x", "1": "one" });
        let map = map.as_object().expect("object");

        let nick = mediator
            .get(&lua, Owner::Container(map), &key(&lua, "nick"))
            .expect("container read");
        assert_eq!(nick.as_str().as_deref(), Some("alice"));

        let raw = mediator
            .get(&lua, Owner::Container(map), &key(&lua, "_raw"))
            .expect("container read");
        assert_eq!(raw.as_str().as_deref(), Some("x"));

        let one = mediator
            .get(&lua, Owner::Container(map), &Value::Integer(1))
            .expect("integer key");
        assert_eq!(one.as_str().as_deref(), Some("one"));

        let missing = mediator
            .get(&lua, Owner::Container(map), &key(&lua, "nope"))
            .expect("miss is nil");
        assert!(missing.is_nil());
    }

    #[test]
    fn writes_denied_except_global_table() {
        let (lua, mediator, probe) = setup(Some(Grant::All));
        let err = mediator
            .set(Owner::Host(&probe), &key(&lua, "a"))
            .unwrap_err();
        assert_eq!(reason_of(err), DenialReason::WriteDenied);

        assert!(mediator.set(Owner::Host(&probe), &key(&lua, "_G")).is_ok());
    }

    #[test]
    fn denial_message_names_only_the_member() {
        let denied = AccessDenied {
            reason: DenialReason::MemberNotPermitted,
            target: "connection".to_string(),
        };
        assert_eq!(
            denied.to_string(),
            "permission denied 'connection' (member not permitted)"
        );
    }
}
