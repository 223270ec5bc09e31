//! Routes every inbound top-level element to the component that owns it.

use chrono::Utc;
use natter_core::EventPayload;
use natter_core::event::RoomId;
use natter_xmpp::message::{ChatMessage, MessageKind};
use natter_xmpp::stanza::{iq_error, iq_result};
use natter_xmpp::{ConnectionError, Element, IqType, Stanza, XmppHost, XmppTransport, ns};
use tracing::{debug, trace};

use crate::connection::{Connection, Flow};

/// Identity advertised in answers to disco#info.
const CLIENT_NAME: &str = "Natter";

const FEATURES: &[&str] = &[
    ns::DISCO_INFO,
    ns::PING,
    ns::MUC,
    ns::CHAT_STATES,
    ns::X_CONFERENCE,
];

impl<T: XmppTransport> Connection<T> {
    pub(crate) fn dispatch(&mut self, element: Element) -> Result<Flow, ConnectionError> {
        let stanza = Stanza::classify(element);
        if stanza.is_negotiation() {
            let actions = self.stream.on_negotiation(stanza)?;
            return self.apply(actions);
        }

        if !self.stream.is_bound() && !is_reply(&stanza) {
            debug!(stanza = stanza.name(), "dropping stanza before session is established");
            return Ok(Flow::Continue);
        }

        match stanza {
            Stanza::Iq(iq) => self.route_iq(iq)?,
            Stanza::Presence(presence) => self.route_presence(&presence),
            Stanza::Message(message) => self.route_message(&message),
            other => debug!(
                name = other.element().name(),
                ns = other.element().ns().unwrap_or_default(),
                "ignoring unknown element"
            ),
        }
        Ok(Flow::Continue)
    }

    fn route_iq(&mut self, iq: Element) -> Result<(), ConnectionError> {
        match IqType::of(&iq) {
            Some(kind) if kind.is_reply() => {
                if let Some(continuation) = self.iq.take(&iq) {
                    continuation(self, iq);
                }
                Ok(())
            }
            Some(_) => self.answer_request(&iq),
            None => {
                debug!(id = iq.attr("id").unwrap_or_default(), "dropping iq without a valid type");
                Ok(())
            }
        }
    }

    /// Answer a `get` or `set` addressed to us. Unknown requests get
    /// `service-unavailable`.
    fn answer_request(&mut self, request: &Element) -> Result<(), ConnectionError> {
        let kind = IqType::of(request);
        if kind == Some(IqType::Set) && request.has_child("query", ns::ROSTER) {
            return natter_roster::flows::handle_push(self, request);
        }
        if kind == Some(IqType::Get) {
            if let Some(query) = request.get_child("query", ns::DISCO_INFO) {
                let reply = disco_info(request, query.attr("node"));
                return self.send(reply);
            }
            if request.has_child("ping", ns::PING) {
                return self.send(iq_result(request));
            }
        }

        debug!(
            from = request.attr("from").unwrap_or_default(),
            id = request.attr("id").unwrap_or_default(),
            "unsupported request"
        );
        self.send(iq_error(request, "cancel", "service-unavailable"))
    }

    fn route_presence(&mut self, presence: &Element) {
        let from = presence.attr("from").unwrap_or_default();
        if self.muc.is_tracked(from) {
            natter_muc::flows::handle_presence(self, presence);
        } else {
            natter_roster::flows::handle_presence(self, presence);
        }
    }

    fn route_message(&mut self, message: &Element) {
        let mut parsed = ChatMessage::parse(message);

        if let Some(invitation) = parsed.invitation.take() {
            let Some(room_id) = RoomId::parse(&invitation.room) else {
                debug!(room = %invitation.room, "dropping invitation to malformed room address");
                return;
            };
            self.emit(EventPayload::RoomInvitationReceived {
                room_id,
                from: invitation.from,
                reason: invitation.reason,
                password: invitation.password,
            });
            return;
        }

        let from_room = self.muc.is_tracked(&parsed.from);
        if from_room && matches!(parsed.kind, MessageKind::Groupchat | MessageKind::Error) {
            natter_muc::flows::handle_message(self, message);
            return;
        }
        if parsed.kind == MessageKind::Groupchat {
            debug!(from = %parsed.from, "dropping groupchat from a room we are not in");
            return;
        }

        if let Some(state) = parsed.chat_state {
            self.emit(EventPayload::ChatStateChanged {
                from: parsed.from.clone(),
                state,
            });
        }

        let flags = parsed.flags();
        let timestamp = parsed.timestamp(Utc::now());
        let body = match parsed.kind {
            MessageKind::Error => parsed.error.or(parsed.body),
            _ => parsed.body,
        };
        match body.filter(|body| !body.is_empty()) {
            Some(body) => self.emit(EventPayload::MessageReceived {
                from: parsed.from,
                body,
                flags,
                timestamp,
            }),
            None => trace!(from = %parsed.from, "message without body"),
        }
    }
}

fn is_reply(stanza: &Stanza) -> bool {
    matches!(stanza, Stanza::Iq(iq) if IqType::of(iq).is_some_and(|kind| kind.is_reply()))
}

fn disco_info(request: &Element, node: Option<&str>) -> Element {
    let mut query = Element::new("query", ns::DISCO_INFO)
        .with_opt_attr("node", node)
        .with_child(
            Element::new("identity", ns::DISCO_INFO)
                .with_attr("category", "client")
                .with_attr("type", "pc")
                .with_attr("name", CLIENT_NAME),
        );
    for feature in FEATURES {
        query.push_child(Element::new("feature", ns::DISCO_INFO).with_attr("var", *feature));
    }
    iq_result(request).with_child(query)
}
