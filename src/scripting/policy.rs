/// `scripting/policy.rs` — per-run capability table
///
/// Maps the identity of each proxy instance handed to a script to the member
/// names it may expose. Built fresh for every run, then frozen behind an `Arc`.
/// A proxy without an entry exposes nothing.

use std::collections::{BTreeSet, HashMap};

/// Token that grants every member of an instance.
pub const WILDCARD: &str = "*";

/// Identity of one proxy instance within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u64);

/// Hands out fresh `ProxyId`s for a single run.
#[derive(Debug, Default)]
pub struct ProxyIds {
    next: u64,
}

impl ProxyIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> ProxyId {
        self.next += 1;
        ProxyId(self.next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Only the listed member names.
    Members(BTreeSet<String>),
    /// Every member of the instance.
    All,
}

impl Grant {
    /// Build a grant from a name list; a `*` entry widens it to `Grant::All`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut members = BTreeSet::new();
        for name in names {
            let name = name.into();
            if name == WILDCARD {
                return Grant::All;
            }
            members.insert(name);
        }
        Grant::Members(members)
    }

    fn covers(&self, name: &str) -> bool {
        match self {
            Grant::All => true,
            Grant::Members(members) => members.contains(name),
        }
    }
}

#[derive(Debug, Default)]
pub struct AccessPolicy {
    entries: HashMap<ProxyId, Grant>,
}

impl AccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for one proxy instance.
    pub fn register(&mut self, owner: ProxyId, grant: Grant) {
        self.entries.insert(owner, grant);
    }

    pub fn is_registered(&self, owner: ProxyId) -> bool {
        self.entries.contains_key(&owner)
    }

    pub fn is_allowed(&self, owner: ProxyId, member: &str) -> bool {
        self.entries
            .get(&owner)
            .map(|grant| grant.covers(member))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_members_only() {
        let mut ids = ProxyIds::new();
        let bot = ids.allocate();
        let mut policy = AccessPolicy::new();
        policy.register(bot, Grant::from_names(["say", "reply"]));

        assert!(policy.is_allowed(bot, "say"));
        assert!(policy.is_allowed(bot, "reply"));
        assert!(!policy.is_allowed(bot, "connection"));
    }

    #[test]
    fn wildcard_allows_everything() {
        let mut ids = ProxyIds::new();
        let extras = ids.allocate();
        let mut policy = AccessPolicy::new();
        policy.register(extras, Grant::from_names(["str", WILDCARD]));

        assert_eq!(Grant::from_names([WILDCARD]), Grant::All);
        assert!(policy.is_allowed(extras, "anything_at_all"));
    }

    #[test]
    fn unregistered_identity_is_denied() {
        let mut ids = ProxyIds::new();
        let registered = ids.allocate();
        let stranger = ids.allocate();
        let mut policy = AccessPolicy::new();
        policy.register(registered, Grant::All);

        assert_ne!(registered, stranger);
        assert!(!policy.is_registered(stranger));
        assert!(!policy.is_allowed(stranger, "say"));
    }

    #[test]
    fn register_overwrites_previous_entry() {
        let mut ids = ProxyIds::new();
        let bot = ids.allocate();
        let mut policy = AccessPolicy::new();
        policy.register(bot, Grant::All);
        policy.register(bot, Grant::from_names(["say"]));

        assert!(policy.is_allowed(bot, "say"));
        assert!(!policy.is_allowed(bot, "reply"));
    }
}
