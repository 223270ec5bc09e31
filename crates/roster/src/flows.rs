//! Roster and buddy-presence traffic on top of an [`XmppHost`].
//!
//! Outgoing operations never touch the mirror. They send a roster set and
//! wait for the server's push, which goes through the same reconciliation
//! as everything else.

use std::collections::BTreeSet;

use natter_core::EventPayload;
use natter_core::event::{PresenceShow, Subscription};
use natter_xmpp::address::{bare_address, parse_address};
use natter_xmpp::stanza::{IqType, error_description, iq_result};
use natter_xmpp::{ConnectionError, Element, XmppHost, ns};
use tracing::{debug, warn};

use crate::error::RosterError;
use crate::item::{RosterItem, parse_items, roster_query, roster_set};
use crate::presence::{PresenceBook, PresenceTransition};
use crate::synchronizer::{RosterChange, RosterSynchronizer};

/// A connection that owns a roster mirror and a presence book.
pub trait RosterHost: XmppHost {
    fn roster(&mut self) -> &mut RosterSynchronizer;

    fn presence_book(&mut self) -> &mut PresenceBook;
}

/// Ask for the full roster; the reply replaces the mirror.
pub fn request_roster<H: RosterHost>(host: &mut H) -> Result<String, RosterError> {
    let id = host.send_query(
        roster_query(),
        Box::new(|host: &mut H, reply: Element| on_roster_result(host, &reply)),
    )?;
    debug!(id = %id, "requested roster");
    Ok(id)
}

fn on_roster_result<H: RosterHost>(host: &mut H, reply: &Element) {
    if IqType::of(reply) == Some(IqType::Error) {
        warn!(error = %error_description(reply), "roster request failed");
        return;
    }
    let items = parse_items(reply, host.roster().default_group());
    let changes = host.roster().apply_full_roster(items);
    publish_changes(host, &changes);
}

/// Handle a roster push (`<iq type='set'><query xmlns='jabber:iq:roster'/>`).
/// Accepted pushes are acknowledged. Foreign pushes and pushes that do not
/// carry exactly one item are dropped unanswered.
pub fn handle_push<H: RosterHost>(host: &mut H, push: &Element) -> Result<(), ConnectionError> {
    let from = push.attr("from");
    if !host.roster().accepts_push(from) {
        warn!(
            from = from.unwrap_or_default(),
            "dropping roster push from foreign address"
        );
        return Ok(());
    }

    let carried = push
        .get_child("query", ns::ROSTER)
        .map_or(0, |query| query.children_named("item", ns::ROSTER).count());
    if carried != 1 {
        debug!(items = carried, "dropping roster push without exactly one item");
        return Ok(());
    }

    let items = parse_items(push, host.roster().default_group());
    let mut changes = Vec::new();
    for item in items {
        changes.extend(host.roster().apply_roster_push(from, item));
    }
    host.send(iq_result(push))?;
    publish_changes(host, &changes);
    Ok(())
}

/// Report reconciliation results: one `RosterChanged` per touched contact,
/// and a local sign-on for the self entry.
pub fn publish_changes<H: RosterHost>(host: &mut H, changes: &[RosterChange]) {
    let mut touched: Vec<&str> = Vec::new();
    for change in changes {
        if let RosterChange::SelfPresence { address } = change {
            if let Some(PresenceTransition::SignedOn(address)) =
                host.presence_book()
                    .available(address, PresenceShow::Available, None, 0)
            {
                host.emit(EventPayload::BuddySignedOn { address });
            }
            continue;
        }
        if !touched.contains(&change.address()) {
            touched.push(change.address());
        }
    }

    for address in touched {
        let payload = match host.roster().entry(address) {
            Some(entry) => EventPayload::RosterChanged {
                address: entry.address.clone(),
                alias: entry.alias.clone(),
                subscription: entry.subscription,
                ask_pending: entry.ask_pending,
                groups: entry.groups.iter().cloned().collect(),
            },
            None => EventPayload::RosterChanged {
                address: address.to_string(),
                alias: None,
                subscription: Subscription::Remove,
                ask_pending: false,
                groups: Vec::new(),
            },
        };
        host.emit(payload);
    }
}

fn send_roster_set<H: RosterHost>(host: &mut H, item: RosterItem) -> Result<String, RosterError> {
    let stanza = roster_set(&item, host.roster().default_group());
    let address = item.address;
    let id = host.send_query(
        stanza,
        Box::new(move |host: &mut H, reply: Element| {
            if IqType::of(&reply) == Some(IqType::Error) {
                let message = format!("could not update {address}: {}", error_description(&reply));
                warn!(address = %address, error = %message, "roster update rejected");
                host.emit(EventPayload::RosterError { address, message });
            }
        }),
    )?;
    Ok(id)
}

fn known_item<H: RosterHost>(host: &mut H, address: &str) -> Result<RosterItem, RosterError> {
    let address = bare_address(address)?.to_string();
    host.roster()
        .entry(&address)
        .map(|entry| entry.to_item())
        .ok_or(RosterError::UnknownContact(address))
}

/// Put `address` on the roster and ask for their presence unless a
/// subscription already exists or is pending.
pub fn add_buddy<H: RosterHost>(
    host: &mut H,
    address: &str,
    alias: Option<String>,
    group: Option<String>,
) -> Result<(), RosterError> {
    let address = bare_address(address)?.to_string();
    let existing = host.roster().entry(&address).cloned();

    let mut item = existing
        .as_ref()
        .map(|entry| entry.to_item())
        .unwrap_or_else(|| RosterItem::new(address.clone()));
    if alias.is_some() {
        item.alias = alias;
    }
    if let Some(group) = group.filter(|group| !group.trim().is_empty()) {
        if existing.is_none() {
            item.groups.clear();
        }
        item.groups.insert(group);
    }

    let needs_subscription = existing
        .as_ref()
        .is_none_or(|entry| !entry.subscription.has_outbound() && !entry.ask_pending);

    send_roster_set(host, item)?;
    if needs_subscription {
        debug!(address = %address, "requesting presence subscription");
        host.send(subscription_presence(&address, "subscribe"))?;
    }
    Ok(())
}

pub fn remove_buddy<H: RosterHost>(host: &mut H, address: &str) -> Result<(), RosterError> {
    let mut item = known_item(host, address)?;
    item.subscription = Subscription::Remove;
    send_roster_set(host, item)?;
    Ok(())
}

/// Move a contact into `new_group`, leaving every other group.
pub fn change_group<H: RosterHost>(
    host: &mut H,
    address: &str,
    new_group: &str,
) -> Result<(), RosterError> {
    let mut item = known_item(host, address)?;
    item.groups = BTreeSet::from([new_group.to_string()]);
    send_roster_set(host, item)?;
    Ok(())
}

pub fn set_alias<H: RosterHost>(
    host: &mut H,
    address: &str,
    alias: Option<String>,
) -> Result<(), RosterError> {
    let mut item = known_item(host, address)?;
    item.alias = alias.filter(|alias| !alias.trim().is_empty());
    send_roster_set(host, item)?;
    Ok(())
}

/// Rename a group by re-filing each of its members. Returns how many
/// contacts were updated.
pub fn rename_group<H: RosterHost>(host: &mut H, old: &str, new: &str) -> Result<usize, RosterError> {
    if old == new {
        return Ok(0);
    }
    let members: Vec<RosterItem> = host
        .roster()
        .members_of(old)
        .map(|entry| entry.to_item())
        .collect();

    let count = members.len();
    for mut item in members {
        item.groups.remove(old);
        item.groups.insert(new.to_string());
        send_roster_set(host, item)?;
    }
    Ok(count)
}

/// Answer a subscription request.
pub fn authorize_subscription<H: RosterHost>(
    host: &mut H,
    address: &str,
    allow: bool,
) -> Result<(), RosterError> {
    let address = bare_address(address)?.to_string();
    let kind = if allow { "subscribed" } else { "unsubscribed" };
    host.send(subscription_presence(&address, kind))?;
    Ok(())
}

fn subscription_presence(address: &str, kind: &str) -> Element {
    Element::new("presence", ns::CLIENT)
        .with_attr("to", address)
        .with_attr("type", kind)
}

/// Presence from a contact (not a room).
pub fn handle_presence<H: RosterHost>(host: &mut H, presence: &Element) {
    let Some(from) = presence.attr("from") else {
        debug!("ignoring presence without sender");
        return;
    };
    let Ok(jid) = parse_address(from) else {
        debug!(from = %from, "ignoring presence from invalid address");
        return;
    };
    let bare = jid.to_bare().to_string();
    let full = match jid.resource() {
        Some(resource) => format!("{bare}/{resource}"),
        None => bare.clone(),
    };

    match presence.attr("type") {
        None => {
            let show = PresenceShow::from_show(presence.child_text("show", ns::CLIENT).as_deref());
            let status = presence.child_text("status", ns::CLIENT);
            let priority = presence
                .child_text("priority", ns::CLIENT)
                .and_then(|priority| priority.trim().parse::<i8>().ok())
                .unwrap_or(0);
            if let Some(PresenceTransition::SignedOn(address)) =
                host.presence_book().available(&full, show, status, priority)
            {
                host.emit(EventPayload::BuddySignedOn { address });
            }
        }
        Some("unavailable" | "error") => {
            if let Some(PresenceTransition::SignedOff(address)) = host.presence_book().unavailable(&full) {
                host.emit(EventPayload::BuddySignedOff { address });
            }
        }
        Some("subscribe") => {
            host.emit(EventPayload::SubscriptionRequested { address: bare });
        }
        Some(kind) => {
            debug!(from = %bare, kind, "subscription state presence; roster push follows");
        }
    }
}

/// Initial availability after binding.
pub fn announce_presence<H: RosterHost>(host: &mut H) -> Result<(), ConnectionError> {
    host.send(Element::new("presence", ns::CLIENT))
}

/// Connection teardown: everyone goes offline and the mirror is dropped.
pub fn sign_off_all<H: RosterHost>(host: &mut H) {
    for address in host.presence_book().clear() {
        host.emit(EventPayload::BuddySignedOff { address });
    }
    host.roster().clear();
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use jid::BareJid;
    use natter_test_support::transport::{RecordingTransport, TransportLog};
    use natter_xmpp::stanza::iq;
    use natter_xmpp::{Continuation, IqTracker, XmppTransport};

    use super::*;

    struct TestHost {
        transport: RecordingTransport,
        iq: IqTracker<TestHost>,
        events: Vec<EventPayload>,
        roster: RosterSynchronizer,
        book: PresenceBook,
    }

    impl TestHost {
        fn new() -> (Self, TransportLog) {
            let (transport, log) = RecordingTransport::new();
            let host = Self {
                transport,
                iq: IqTracker::new(),
                events: Vec::new(),
                roster: RosterSynchronizer::new(BareJid::new("user@home.realm").unwrap(), "Buddies"),
                book: PresenceBook::new(),
            };
            (host, log)
        }

        fn deliver(&mut self, reply: Element) {
            if let Some(continuation) = self.iq.take(&reply) {
                continuation(self, reply);
            }
        }
    }

    impl XmppHost for TestHost {
        fn send(&mut self, stanza: Element) -> Result<(), ConnectionError> {
            self.transport.write(&stanza.to_bytes())
        }

        fn send_query(
            &mut self,
            stanza: Element,
            continuation: Continuation<Self>,
        ) -> Result<String, ConnectionError> {
            self.iq.send_query(&mut self.transport, stanza, continuation)
        }

        fn emit(&mut self, payload: EventPayload) {
            self.events.push(payload);
        }
    }

    impl RosterHost for TestHost {
        fn roster(&mut self) -> &mut RosterSynchronizer {
            &mut self.roster
        }

        fn presence_book(&mut self) -> &mut PresenceBook {
            &mut self.book
        }
    }

    fn push(from: Option<&str>, item: Element) -> Element {
        iq(IqType::Set)
            .with_attr("id", "push1")
            .with_opt_attr("from", from)
            .with_child(Element::new("query", ns::ROSTER).with_child(item))
    }

    fn romeo(subscription: &str) -> Element {
        Element::new("item", ns::ROSTER)
            .with_attr("jid", "romeo@montague.lit")
            .with_attr("subscription", subscription)
            .with_child(Element::new("group", ns::ROSTER).with_text("Friends"))
    }

    #[test]
    fn full_roster_reply_fills_the_mirror_and_seeds_self() {
        let (mut host, log) = TestHost::new();
        let id = request_roster(&mut host).unwrap();
        assert!(log.take_text().contains("jabber:iq:roster"));

        let reply = iq(IqType::Result).with_attr("id", id).with_child(
            Element::new("query", ns::ROSTER)
                .with_child(romeo("both"))
                .with_child(
                    Element::new("item", ns::ROSTER)
                        .with_attr("jid", "user@home.realm")
                        .with_attr("subscription", "both"),
                ),
        );
        host.deliver(reply);

        assert!(host.roster.has_received_roster());
        assert_eq!(host.roster.len(), 1);
        assert_eq!(
            host.events,
            vec![
                EventPayload::BuddySignedOn {
                    address: "user@home.realm".to_string()
                },
                EventPayload::RosterChanged {
                    address: "romeo@montague.lit".to_string(),
                    alias: None,
                    subscription: Subscription::Both,
                    ask_pending: false,
                    groups: vec!["Friends".to_string()],
                },
            ]
        );
    }

    #[test]
    fn push_is_acknowledged_and_reported_once() {
        let (mut host, log) = TestHost::new();
        handle_push(&mut host, &push(None, romeo("to"))).unwrap();
        assert!(log.take_text().contains("type='result' id='push1'"));
        assert_eq!(host.events.len(), 1);

        handle_push(&mut host, &push(None, romeo("to"))).unwrap();
        assert_eq!(host.events.len(), 1, "replayed push must not emit again");
    }

    #[test]
    fn foreign_push_is_dropped_unanswered() {
        let (mut host, log) = TestHost::new();
        handle_push(&mut host, &push(Some("attacker@other.realm"), romeo("both"))).unwrap();
        assert!(log.is_empty());
        assert!(host.roster.is_empty());
        assert!(host.events.is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn push_with_several_items_is_dropped_unanswered() {
        let (mut host, log) = TestHost::new();
        let several = iq(IqType::Set).with_attr("id", "push1").with_child(
            Element::new("query", ns::ROSTER).with_child(romeo("both")).with_child(
                Element::new("item", ns::ROSTER)
                    .with_attr("jid", "benvolio@montague.lit")
                    .with_attr("subscription", "both"),
            ),
        );
        handle_push(&mut host, &several).unwrap();

        let empty = iq(IqType::Set)
            .with_attr("id", "push2")
            .with_child(Element::new("query", ns::ROSTER));
        handle_push(&mut host, &empty).unwrap();

        assert!(log.is_empty());
        assert!(host.roster.is_empty());
        assert!(host.events.is_empty());
        assert!(logs_contain("dropping roster push without exactly one item"));
    }

    #[test]
    fn removal_push_reports_remove() {
        let (mut host, _log) = TestHost::new();
        handle_push(&mut host, &push(None, romeo("both"))).unwrap();
        host.events.clear();

        handle_push(&mut host, &push(Some("user@home.realm"), romeo("remove"))).unwrap();
        assert_matches!(
            host.events.as_slice(),
            [EventPayload::RosterChanged { subscription: Subscription::Remove, groups, .. }] if groups.is_empty()
        );
    }

    #[test]
    fn add_buddy_subscribes_only_when_needed() {
        let (mut host, log) = TestHost::new();
        add_buddy(&mut host, "juliet@capulet.lit", Some("Juliet".to_string()), Some("Family".to_string())).unwrap();
        let sent = log.take_text();
        assert!(sent.contains("<query xmlns='jabber:iq:roster'><item jid='juliet@capulet.lit' name='Juliet'><group>Family</group></item></query>"));
        assert!(sent.contains("<presence xmlns='jabber:client' to='juliet@capulet.lit' type='subscribe'/>"));
        assert!(host.roster.entry("juliet@capulet.lit").is_none(), "mirror waits for the push");

        handle_push(&mut host, &push(None, romeo("both"))).unwrap();
        log.take_text();
        add_buddy(&mut host, "romeo@montague.lit", None, Some("Verona".to_string())).unwrap();
        let sent = log.take_text();
        assert!(sent.contains("<group>Friends</group><group>Verona</group>"));
        assert!(!sent.contains("type='subscribe'"));
    }

    #[test]
    fn pending_subscription_is_not_requested_again() {
        let (mut host, log) = TestHost::new();
        let pending = Element::new("item", ns::ROSTER)
            .with_attr("jid", "nurse@capulet.lit")
            .with_attr("subscription", "none")
            .with_attr("ask", "subscribe");
        handle_push(&mut host, &push(None, pending)).unwrap();
        log.take_text();

        add_buddy(&mut host, "nurse@capulet.lit", None, None).unwrap();
        assert!(!log.take_text().contains("type='subscribe'"));
    }

    #[test]
    fn operations_on_unknown_contacts_fail_locally() {
        let (mut host, log) = TestHost::new();
        assert_matches!(
            remove_buddy(&mut host, "ghost@example.com"),
            Err(RosterError::UnknownContact(address)) if address == "ghost@example.com"
        );
        assert_matches!(
            change_group(&mut host, "ghost@example.com", "Work"),
            Err(RosterError::UnknownContact(_))
        );
        assert_matches!(add_buddy(&mut host, "", None, None), Err(RosterError::Validation(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn rejected_roster_set_names_the_buddy() {
        let (mut host, log) = TestHost::new();
        handle_push(&mut host, &push(None, romeo("both"))).unwrap();
        log.take_text();
        host.events.clear();

        change_group(&mut host, "romeo@montague.lit", "Verona").unwrap();
        assert_eq!(host.iq.pending_count(), 1);
        assert!(log.take_text().contains("id='natter1'"));

        host.deliver(
            iq(IqType::Error).with_attr("id", "natter1").with_child(
                Element::new("error", ns::CLIENT)
                    .with_attr("type", "modify")
                    .with_child(Element::new("not-acceptable", natter_xmpp::ns::STANZAS)),
            ),
        );
        assert_matches!(
            host.events.as_slice(),
            [EventPayload::RosterError { address, message }]
                if address == "romeo@montague.lit" && message.contains("not-acceptable")
        );
        assert_eq!(host.roster.entry("romeo@montague.lit").unwrap().groups, BTreeSet::from(["Friends".to_string()]));
    }

    #[test]
    fn rename_group_refiles_every_member() {
        let (mut host, log) = TestHost::new();
        handle_push(&mut host, &push(None, romeo("both"))).unwrap();
        log.take_text();

        assert_eq!(rename_group(&mut host, "Friends", "Verona").unwrap(), 1);
        let sent = log.take_text();
        assert!(sent.contains("<group>Verona</group>"));
        assert!(!sent.contains("<group>Friends</group>"));
        assert_eq!(rename_group(&mut host, "Nobody", "X").unwrap(), 0);
    }

    #[test]
    fn presence_signs_buddies_on_and_off() {
        let (mut host, _log) = TestHost::new();
        let available = Element::new("presence", ns::CLIENT)
            .with_attr("from", "juliet@capulet.lit/balcony")
            .with_child(Element::new("show", ns::CLIENT).with_text("away"));
        handle_presence(&mut host, &available);
        handle_presence(&mut host, &available);
        handle_presence(
            &mut host,
            &Element::new("presence", ns::CLIENT)
                .with_attr("from", "juliet@capulet.lit/balcony")
                .with_attr("type", "unavailable"),
        );
        handle_presence(
            &mut host,
            &Element::new("presence", ns::CLIENT)
                .with_attr("from", "tybalt@capulet.lit")
                .with_attr("type", "subscribe"),
        );

        assert_eq!(
            host.events,
            vec![
                EventPayload::BuddySignedOn {
                    address: "juliet@capulet.lit".to_string()
                },
                EventPayload::BuddySignedOff {
                    address: "juliet@capulet.lit".to_string()
                },
                EventPayload::SubscriptionRequested {
                    address: "tybalt@capulet.lit".to_string()
                },
            ]
        );
    }

    #[test]
    fn authorization_answers_with_subscribed() {
        let (mut host, log) = TestHost::new();
        authorize_subscription(&mut host, "tybalt@capulet.lit", true).unwrap();
        authorize_subscription(&mut host, "tybalt@capulet.lit", false).unwrap();
        let sent = log.text();
        assert!(sent.contains("type='subscribed'"));
        assert!(sent.contains("type='unsubscribed'"));
    }

    #[test]
    fn teardown_signs_everyone_off() {
        let (mut host, _log) = TestHost::new();
        handle_presence(
            &mut host,
            &Element::new("presence", ns::CLIENT).with_attr("from", "juliet@capulet.lit/balcony"),
        );
        handle_push(&mut host, &push(None, romeo("both"))).unwrap();
        host.events.clear();

        sign_off_all(&mut host);
        assert_eq!(
            host.events,
            vec![EventPayload::BuddySignedOff {
                address: "juliet@capulet.lit".to_string()
            }]
        );
        assert!(host.roster.is_empty());
    }
}
