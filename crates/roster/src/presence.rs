use std::collections::HashMap;

use chrono::{DateTime, Utc};
use natter_core::event::PresenceShow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceInfo {
    pub show: PresenceShow,
    pub status: Option<String>,
    pub priority: i8,
    pub last_updated: DateTime<Utc>,
}

/// Sign-on state change of a bare address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    SignedOn(String),
    SignedOff(String),
}

/// Per-resource presence map for a single bare address.
type ResourceMap = HashMap<String, PresenceInfo>;

/// Online resources of every contact on one connection.
#[derive(Debug, Default)]
pub struct PresenceBook {
    contacts: HashMap<String, ResourceMap>,
}

impl PresenceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an available resource. Reports `SignedOn` for the first one.
    pub fn available(
        &mut self,
        address: &str,
        show: PresenceShow,
        status: Option<String>,
        priority: i8,
    ) -> Option<PresenceTransition> {
        let (bare, resource) = split(address);
        let resources = self.contacts.entry(bare.to_string()).or_default();
        let first = resources.is_empty();
        resources.insert(
            resource.to_string(),
            PresenceInfo {
                show,
                status,
                priority,
                last_updated: Utc::now(),
            },
        );
        first.then(|| PresenceTransition::SignedOn(bare.to_string()))
    }

    /// Drop a resource. Reports `SignedOff` when it was the last one. A
    /// bare address with no resource drops all of them.
    pub fn unavailable(&mut self, address: &str) -> Option<PresenceTransition> {
        let (bare, resource) = split(address);
        let resources = self.contacts.get_mut(bare)?;
        if address.contains('/') {
            resources.remove(resource)?;
        } else {
            resources.clear();
        }
        if !resources.is_empty() {
            return None;
        }
        self.contacts.remove(bare);
        Some(PresenceTransition::SignedOff(bare.to_string()))
    }

    pub fn is_online(&self, bare: &str) -> bool {
        self.contacts.get(bare).is_some_and(|resources| !resources.is_empty())
    }

    /// Highest-priority resource's presence; ties go to the most recent.
    pub fn best(&self, bare: &str) -> Option<&PresenceInfo> {
        self.contacts.get(bare)?.values().max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.last_updated.cmp(&b.last_updated))
        })
    }

    /// Forget everyone, returning the addresses that were online.
    pub fn clear(&mut self) -> Vec<String> {
        let mut online: Vec<String> = self.contacts.drain().map(|(bare, _)| bare).collect();
        online.sort();
        online
    }
}

fn split(address: &str) -> (&str, &str) {
    match address.split_once('/') {
        Some((bare, resource)) => (bare, resource),
        None => (address, ""),
    }
}
