//! Presence sent by a room about one of its occupants (XEP-0045 §7).

use natter_core::event::{MucAffiliation, MucRole, PresenceShow};
use natter_xmpp::stanza::error_description;
use natter_xmpp::{Element, ns};

/// Status codes the session manager acts on.
pub mod status {
    /// Presence refers to the receiving user.
    pub const SELF_PRESENCE: u16 = 110;
    /// A new room was created and is locked until configured.
    pub const ROOM_CREATED: u16 = 201;
    pub const BANNED: u16 = 301;
    pub const NICK_CHANGED: u16 = 303;
    pub const KICKED: u16 = 307;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupantPresenceKind {
    Available,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupantPresence {
    /// Handle the presence is about. Empty for presence from the bare room.
    pub handle: String,
    pub kind: OccupantPresenceKind,
    pub show: PresenceShow,
    pub status: Option<String>,
    pub affiliation: MucAffiliation,
    pub role: MucRole,
    /// Bare real address, only given by non-anonymous rooms.
    pub real_address: Option<String>,
    /// New handle on a 303 nick change.
    pub new_handle: Option<String>,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub codes: Vec<u16>,
    /// Description of the error condition for error presence.
    pub error: Option<String>,
}

impl OccupantPresence {
    pub fn parse(presence: &Element) -> Self {
        let from = presence.attr("from").unwrap_or_default();
        let handle = from
            .split_once('/')
            .map(|(_, handle)| handle.to_string())
            .unwrap_or_default();

        let kind = match presence.attr("type") {
            Some("unavailable") => OccupantPresenceKind::Unavailable,
            Some("error") => OccupantPresenceKind::Error,
            _ => OccupantPresenceKind::Available,
        };

        let user = presence.get_child("x", ns::MUC_USER);
        let item = user.and_then(|user| user.get_child("item", ns::MUC_USER));
        let codes = user
            .map(|user| {
                user.children_named("status", ns::MUC_USER)
                    .filter_map(|status| status.attr("code")?.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            handle,
            kind,
            show: PresenceShow::from_show(presence.child_text("show", ns::CLIENT).as_deref()),
            status: presence
                .child_text("status", ns::CLIENT)
                .filter(|status| !status.is_empty()),
            affiliation: item
                .and_then(|item| item.attr("affiliation"))
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            role: item
                .and_then(|item| item.attr("role"))
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
            real_address: item
                .and_then(|item| item.attr("jid"))
                .map(|jid| jid.split('/').next().unwrap_or(jid).to_string()),
            new_handle: item.and_then(|item| item.attr("nick")).map(str::to_string),
            actor: item
                .and_then(|item| item.get_child("actor", ns::MUC_USER))
                .and_then(|actor| actor.attr("nick").or_else(|| actor.attr("jid")))
                .map(str::to_string),
            reason: item
                .and_then(|item| item.child_text("reason", ns::MUC_USER))
                .filter(|reason| !reason.is_empty()),
            codes,
            error: (kind == OccupantPresenceKind::Error).then(|| error_description(presence)),
        }
    }

    pub fn has_code(&self, code: u16) -> bool {
        self.codes.contains(&code)
    }
}
