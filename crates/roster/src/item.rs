//! `jabber:iq:roster` items and the queries that carry them.

use std::collections::BTreeSet;

use natter_core::event::Subscription;
use natter_xmpp::address::bare_address;
use natter_xmpp::stanza::{IqType, iq};
use natter_xmpp::{Element, ValidationError, ns};

/// One roster item as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    /// Normalized bare address.
    pub address: String,
    pub alias: Option<String>,
    pub subscription: Subscription,
    pub ask_pending: bool,
    pub groups: BTreeSet<String>,
}

impl RosterItem {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            alias: None,
            subscription: Subscription::None,
            ask_pending: false,
            groups: BTreeSet::new(),
        }
    }

    /// Parse an `<item/>`. An item with no `<group/>` lands in
    /// `default_group`.
    pub fn parse(item: &Element, default_group: &str) -> Result<Self, ValidationError> {
        let address = item.attr("jid").unwrap_or_default();
        let address = bare_address(address)?.to_string();

        let mut groups: BTreeSet<String> = item
            .children_named("group", ns::ROSTER)
            .map(|group| group.text().trim().to_string())
            .filter(|group| !group.is_empty())
            .collect();
        if groups.is_empty() {
            groups.insert(default_group.to_string());
        }

        Ok(Self {
            address,
            alias: item
                .attr("name")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string),
            subscription: item
                .attr("subscription")
                .and_then(|value| value.parse().ok())
                .unwrap_or(Subscription::None),
            ask_pending: item.attr("ask") == Some("subscribe"),
            groups,
        })
    }

    /// The `<item/>` sent in a roster set. Subscription is server-owned and
    /// only written when requesting removal.
    pub fn to_element(&self, default_group: &str) -> Element {
        let mut item = Element::new("item", ns::ROSTER)
            .with_attr("jid", self.address.as_str())
            .with_opt_attr("name", self.alias.as_deref());
        if self.subscription == Subscription::Remove {
            item.set_attr("subscription", Subscription::Remove.as_str());
            return item;
        }
        for group in self.groups.iter().filter(|group| group.as_str() != default_group) {
            item.push_child(Element::new("group", ns::ROSTER).with_text(group.as_str()));
        }
        item
    }
}

/// Items of a roster result or push. Invalid items are skipped.
pub fn parse_items(iq: &Element, default_group: &str) -> Vec<RosterItem> {
    let Some(query) = iq.get_child("query", ns::ROSTER) else {
        return Vec::new();
    };
    query
        .children_named("item", ns::ROSTER)
        .filter_map(|item| match RosterItem::parse(item, default_group) {
            Ok(item) => Some(item),
            Err(error) => {
                tracing::debug!(error = %error, "skipping invalid roster item");
                None
            }
        })
        .collect()
}

pub fn roster_query() -> Element {
    iq(IqType::Get).with_child(Element::new("query", ns::ROSTER))
}

pub fn roster_set(item: &RosterItem, default_group: &str) -> Element {
    iq(IqType::Set).with_child(Element::new("query", ns::ROSTER).with_child(item.to_element(default_group)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "Buddies";

    #[test]
    fn parses_groups_subscription_and_ask() {
        let item = Element::new("item", ns::ROSTER)
            .with_attr("jid", "romeo@example.net/orchard")
            .with_attr("name", "Romeo")
            .with_attr("subscription", "both")
            .with_attr("ask", "subscribe")
            .with_child(Element::new("group", ns::ROSTER).with_text("Friends"))
            .with_child(Element::new("group", ns::ROSTER).with_text("Lovers"));

        let item = RosterItem::parse(&item, DEFAULT).unwrap();
        assert_eq!(item.address, "romeo@example.net");
        assert_eq!(item.alias.as_deref(), Some("Romeo"));
        assert_eq!(item.subscription, Subscription::Both);
        assert!(item.ask_pending);
        assert_eq!(
            item.groups.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Friends", "Lovers"]
        );
    }

    #[test]
    fn missing_groups_mean_the_default_group() {
        let item = Element::new("item", ns::ROSTER).with_attr("jid", "nurse@example.com");
        let item = RosterItem::parse(&item, DEFAULT).unwrap();
        assert_eq!(item.groups, BTreeSet::from([DEFAULT.to_string()]));
        assert_eq!(item.subscription, Subscription::None);
        assert!(!item.ask_pending);
    }

    #[test]
    fn invalid_items_are_skipped() {
        let push = iq(IqType::Set).with_child(
            Element::new("query", ns::ROSTER)
                .with_child(Element::new("item", ns::ROSTER))
                .with_child(Element::new("item", ns::ROSTER).with_attr("jid", "tybalt@example.com")),
        );
        let items = parse_items(&push, DEFAULT);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].address, "tybalt@example.com");
    }

    #[test]
    fn set_omits_the_implicit_group_and_subscription() {
        let mut item = RosterItem::new("nurse@example.com");
        item.alias = Some("Nurse".to_string());
        item.subscription = Subscription::Both;
        item.groups = BTreeSet::from([DEFAULT.to_string(), "Servants".to_string()]);
        assert_eq!(
            item.to_element(DEFAULT).to_string(),
            "<item xmlns='jabber:iq:roster' jid='nurse@example.com' name='Nurse'><group>Servants</group></item>"
        );

        item.subscription = Subscription::Remove;
        assert_eq!(
            item.to_element(DEFAULT).to_string(),
            "<item xmlns='jabber:iq:roster' jid='nurse@example.com' name='Nurse' subscription='remove'/>"
        );
    }
}
