//! Parsing of inbound `<message/>` stanzas and builders for outbound ones.

use chrono::{DateTime, NaiveDateTime, Utc};
use natter_core::event::{ChatState, MessageFlags};

use crate::element::Element;
use crate::ns;
use crate::stanza::error_description;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageKind {
    #[default]
    Normal,
    Chat,
    Groupchat,
    Headline,
    Error,
}

impl MessageKind {
    pub fn of(message: &Element) -> Self {
        match message.attr("type") {
            Some("chat") => MessageKind::Chat,
            Some("groupchat") => MessageKind::Groupchat,
            Some("headline") => MessageKind::Headline,
            Some("error") => MessageKind::Error,
            _ => MessageKind::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Normal => "normal",
            MessageKind::Chat => "chat",
            MessageKind::Groupchat => "groupchat",
            MessageKind::Headline => "headline",
            MessageKind::Error => "error",
        }
    }
}

/// A room invitation, direct (`jabber:x:conference`) or mediated by the room
/// (muc#user `<invite/>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub room: String,
    pub from: String,
    pub reason: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub subject: Option<String>,
    pub thread: Option<String>,
    pub chat_state: Option<ChatState>,
    /// Original send time of stored or forwarded messages.
    pub delay: Option<DateTime<Utc>>,
    pub invitation: Option<Invitation>,
    /// Description of the error condition for `type='error'` messages.
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn parse(message: &Element) -> Self {
        let from = message.attr("from").unwrap_or_default().to_string();
        let kind = MessageKind::of(message);

        let chat_state = message
            .children()
            .filter(|child| child.ns() == Some(ns::CHAT_STATES))
            .find_map(|child| ChatState::from_element_name(child.name()));

        let error = (kind == MessageKind::Error).then(|| error_description(message));

        Self {
            invitation: parse_invitation(message, &from),
            body: message.child_text("body", ns::CLIENT),
            subject: message.child_text("subject", ns::CLIENT),
            thread: message.child_text("thread", ns::CLIENT),
            delay: delay_stamp(message),
            from,
            kind,
            chat_state,
            error,
        }
    }

    pub fn flags(&self) -> MessageFlags {
        MessageFlags {
            groupchat: self.kind == MessageKind::Groupchat,
            headline: self.kind == MessageKind::Headline,
            delayed: self.delay.is_some(),
            error: self.kind == MessageKind::Error,
        }
    }

    /// Delay stamp if present, otherwise `received`.
    pub fn timestamp(&self, received: DateTime<Utc>) -> DateTime<Utc> {
        self.delay.unwrap_or(received)
    }
}

/// Timestamp from `urn:xmpp:delay` (XEP-0203), falling back to the legacy
/// `jabber:x:delay` (XEP-0091) form `CCYYMMDDThh:mm:ss`.
pub fn delay_stamp(stanza: &Element) -> Option<DateTime<Utc>> {
    let modern = stanza
        .get_child("delay", ns::DELAY)
        .and_then(|delay| delay.attr("stamp"))
        .and_then(|stamp| DateTime::parse_from_rfc3339(stamp.trim()).ok())
        .map(|stamp| stamp.with_timezone(&Utc));

    modern.or_else(|| {
        let stamp = stanza.get_child("x", ns::X_DELAY)?.attr("stamp")?;
        NaiveDateTime::parse_from_str(stamp.trim(), "%Y%m%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    })
}

fn parse_invitation(message: &Element, from: &str) -> Option<Invitation> {
    if let Some(direct) = message.get_child("x", ns::X_CONFERENCE) {
        let room = direct.attr("jid")?;
        return Some(Invitation {
            room: room.to_string(),
            from: from.to_string(),
            reason: direct.attr("reason").map(str::to_string),
            password: direct.attr("password").map(str::to_string),
        });
    }

    let user = message.get_child("x", ns::MUC_USER)?;
    let invite = user.get_child("invite", ns::MUC_USER)?;
    Some(Invitation {
        room: from.split('/').next().unwrap_or(from).to_string(),
        from: invite.attr("from").unwrap_or_default().to_string(),
        reason: invite.child_text("reason", ns::MUC_USER),
        password: user.child_text("password", ns::MUC_USER),
    })
}

pub fn chat_message(to: &str, body: &str) -> Element {
    Element::new("message", ns::CLIENT)
        .with_attr("to", to)
        .with_attr("type", MessageKind::Chat.as_str())
        .with_child(Element::new("body", ns::CLIENT).with_text(body))
        .with_child(Element::new("active", ns::CHAT_STATES))
}

pub fn groupchat_message(room: &str, body: &str) -> Element {
    Element::new("message", ns::CLIENT)
        .with_attr("to", room)
        .with_attr("type", MessageKind::Groupchat.as_str())
        .with_child(Element::new("body", ns::CLIENT).with_text(body))
}
