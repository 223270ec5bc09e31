//! Server-authoritative roster mirror.
//!
//! The mirror only changes on roster results and pushes from the server.
//! Every incoming item goes through one reconciliation routine that diffs it
//! against the mirrored entry and reports only what actually changed, so
//! replaying the same item is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use jid::BareJid;
use natter_core::event::Subscription;
use natter_xmpp::address::is_own_address;
use tracing::{debug, warn};

use crate::item::RosterItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub address: String,
    pub alias: Option<String>,
    pub subscription: Subscription,
    pub ask_pending: bool,
    pub groups: BTreeSet<String>,
}

impl RosterEntry {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            alias: None,
            subscription: Subscription::None,
            ask_pending: false,
            groups: BTreeSet::new(),
        }
    }

    /// Copy of this entry as an outgoing item.
    pub fn to_item(&self) -> RosterItem {
        RosterItem {
            address: self.address.clone(),
            alias: self.alias.clone(),
            subscription: self.subscription,
            ask_pending: self.ask_pending,
            groups: self.groups.clone(),
        }
    }
}

/// One local-list operation produced by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Added { address: String },
    GroupAdded { address: String, group: String },
    GroupRemoved { address: String, group: String },
    AliasChanged { address: String, alias: Option<String> },
    SubscriptionChanged {
        address: String,
        subscription: Subscription,
        ask_pending: bool,
    },
    Removed { address: String },
    /// The account's own roster entry; seeds the local self presence.
    SelfPresence { address: String },
}

impl RosterChange {
    pub fn address(&self) -> &str {
        match self {
            RosterChange::Added { address }
            | RosterChange::GroupAdded { address, .. }
            | RosterChange::GroupRemoved { address, .. }
            | RosterChange::AliasChanged { address, .. }
            | RosterChange::SubscriptionChanged { address, .. }
            | RosterChange::Removed { address }
            | RosterChange::SelfPresence { address } => address,
        }
    }
}

#[derive(Debug)]
pub struct RosterSynchronizer {
    account: BareJid,
    default_group: String,
    entries: BTreeMap<String, RosterEntry>,
    self_seeded: bool,
    received: bool,
}

impl RosterSynchronizer {
    pub fn new(account: BareJid, default_group: impl Into<String>) -> Self {
        Self {
            account,
            default_group: default_group.into(),
            entries: BTreeMap::new(),
            self_seeded: false,
            received: false,
        }
    }

    pub fn account(&self) -> &BareJid {
        &self.account
    }

    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    pub fn entry(&self, address: &str) -> Option<&RosterEntry> {
        self.entries.get(address)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a full roster has been applied since the last [`clear`](Self::clear).
    pub fn has_received_roster(&self) -> bool {
        self.received
    }

    /// Every group name in use, sorted.
    pub fn groups(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .flat_map(|entry| entry.groups.iter().cloned())
            .collect()
    }

    /// Contacts currently listed under `group`.
    pub fn members_of<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a RosterEntry> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.groups.contains(group))
    }

    /// Pushes are only trusted from the server itself or from the account.
    pub fn accepts_push(&self, from: Option<&str>) -> bool {
        match from {
            None => true,
            Some(from) => is_own_address(from, &self.account),
        }
    }

    /// Apply the reply to the initial roster query. Mirrored contacts the
    /// reply no longer lists are removed.
    pub fn apply_full_roster(&mut self, items: Vec<RosterItem>) -> Vec<RosterChange> {
        let listed: BTreeSet<String> = items.iter().map(|item| item.address.clone()).collect();
        let mut changes = Vec::new();
        for item in items {
            changes.extend(self.reconcile(item));
        }

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|address| !listed.contains(*address))
            .cloned()
            .collect();
        for address in stale {
            self.entries.remove(&address);
            changes.push(RosterChange::Removed { address });
        }

        self.received = true;
        debug!(contacts = self.entries.len(), changes = changes.len(), "applied full roster");
        changes
    }

    /// Apply one pushed item. Pushes from anyone but the server or the
    /// account are dropped and change nothing.
    pub fn apply_roster_push(&mut self, from: Option<&str>, item: RosterItem) -> Vec<RosterChange> {
        if !self.accepts_push(from) {
            warn!(
                from = from.unwrap_or_default(),
                account = %self.account,
                "ignoring roster push from foreign address"
            );
            return Vec::new();
        }
        self.reconcile(item)
    }

    fn reconcile(&mut self, item: RosterItem) -> Vec<RosterChange> {
        let address = item.address;

        if is_own_address(&address, &self.account) {
            if item.subscription == Subscription::Remove {
                self.self_seeded = false;
                return Vec::new();
            }
            if self.self_seeded {
                return Vec::new();
            }
            self.self_seeded = true;
            return vec![RosterChange::SelfPresence { address }];
        }

        if item.subscription == Subscription::Remove {
            return match self.entries.remove(&address) {
                Some(_) => vec![RosterChange::Removed { address }],
                None => Vec::new(),
            };
        }

        let mut changes = Vec::new();
        let entry = self.entries.entry(address.clone()).or_insert_with(|| {
            changes.push(RosterChange::Added {
                address: address.clone(),
            });
            RosterEntry::new(&address)
        });

        if entry.subscription != item.subscription || entry.ask_pending != item.ask_pending {
            entry.subscription = item.subscription;
            entry.ask_pending = item.ask_pending;
            changes.push(RosterChange::SubscriptionChanged {
                address: address.clone(),
                subscription: item.subscription,
                ask_pending: item.ask_pending,
            });
        }

        if entry.alias != item.alias {
            entry.alias = item.alias.clone();
            changes.push(RosterChange::AliasChanged {
                address: address.clone(),
                alias: item.alias,
            });
        }

        for group in item.groups.difference(&entry.groups) {
            changes.push(RosterChange::GroupAdded {
                address: address.clone(),
                group: group.clone(),
            });
        }
        for group in entry.groups.difference(&item.groups) {
            changes.push(RosterChange::GroupRemoved {
                address: address.clone(),
                group: group.clone(),
            });
        }
        entry.groups = item.groups;

        changes
    }

    /// Connection teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.self_seeded = false;
        self.received = false;
    }
}
