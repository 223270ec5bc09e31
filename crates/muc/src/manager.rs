//! The per-connection room table.
//!
//! `MucManager` owns state only. Methods that need the network return the
//! stanza to send and leave sending (and IQ correlation) to the caller, see
//! [`crate::flows`].

use std::collections::BTreeMap;

use chrono::Utc;
use natter_core::EventPayload;
use natter_core::event::{MucAffiliation, MucRole, RoomId};
use natter_xmpp::address::{bare_address, validate_handle, validate_room_address};
use natter_xmpp::message::{ChatMessage, MessageKind, groupchat_message};
use natter_xmpp::stanza::{IqType, iq};
use natter_xmpp::{Element, ns};
use tracing::{debug, info, warn};

use crate::error::MucError;
use crate::occupant::{OccupantPresence, OccupantPresenceKind, status};
use crate::room::{Member, MemberUpdate, PendingForm, Room, RoomState};

#[derive(Debug, Default)]
pub struct MucManager {
    rooms: BTreeMap<RoomId, Room>,
}

impl MucManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Whether stanzas from `address` belong to a room session.
    pub fn is_tracked(&self, address: &str) -> bool {
        RoomId::parse(address).is_some_and(|id| self.rooms.contains_key(&id))
    }

    fn room_mut(&mut self, id: &RoomId) -> Result<&mut Room, MucError> {
        self.rooms
            .get_mut(id)
            .ok_or_else(|| MucError::UnknownRoom(id.clone()))
    }

    fn present_room(&self, id: &RoomId) -> Result<&Room, MucError> {
        let room = self
            .rooms
            .get(id)
            .ok_or_else(|| MucError::UnknownRoom(id.clone()))?;
        if !room.state.is_present() {
            return Err(MucError::NotJoined(id.clone()));
        }
        Ok(room)
    }

    /// Start joining a room. Returns the join presence, or `None` when a
    /// session for the room already exists and is not `Left`.
    pub fn join(
        &mut self,
        room: &str,
        server: &str,
        handle: &str,
        password: Option<String>,
    ) -> Result<Option<Element>, MucError> {
        validate_room_address(room, server, handle)?;
        let id = RoomId::new(room, server);

        if let Some(existing) = self.rooms.get_mut(&id) {
            if existing.state != RoomState::Left {
                debug!(room = %id, "already in or joining room");
                return Ok(None);
            }
            existing.state = RoomState::Joining;
            existing.handle = handle.to_string();
            existing.password = password;
            existing.pending_form = None;
            info!(room = %id, handle, "rejoining room");
            return Ok(Some(join_presence(existing)));
        }

        let session = Room::new(id.clone(), handle, password);
        let presence = join_presence(&session);
        info!(room = %id, handle, "joining room");
        self.rooms.insert(id, session);
        Ok(Some(presence))
    }

    /// Leave a room, keeping its record. Returns `None` if already left.
    pub fn part(&mut self, id: &RoomId, message: Option<&str>) -> Result<Option<Element>, MucError> {
        let room = self.room_mut(id)?;
        if room.state == RoomState::Left {
            return Ok(None);
        }
        room.state = RoomState::Left;
        room.pending_form = None;
        room.clear_members();
        info!(room = %id, "leaving room");
        Ok(Some(part_presence(room, message)))
    }

    /// Destroy a room record, leaving first when still in it.
    pub fn close(&mut self, id: &RoomId) -> Result<Option<Element>, MucError> {
        let room = self
            .rooms
            .remove(id)
            .ok_or_else(|| MucError::UnknownRoom(id.clone()))?;
        debug!(room = %id, "closed room session");
        Ok((room.state != RoomState::Left).then(|| part_presence(&room, None)))
    }

    /// Connection teardown. Returns the rooms we were still in.
    pub fn clear(&mut self) -> Vec<RoomId> {
        std::mem::take(&mut self.rooms)
            .into_values()
            .filter(|room| room.state != RoomState::Left)
            .map(|room| room.id)
            .collect()
    }

    /// Apply presence from a room or one of its occupants.
    pub fn handle_presence(&mut self, presence: &Element) -> Vec<EventPayload> {
        let Some(id) = presence.attr("from").and_then(RoomId::parse) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&id) else {
            debug!(room = %id, "presence for unknown room");
            return Vec::new();
        };
        let occupant = OccupantPresence::parse(presence);

        if occupant.kind == OccupantPresenceKind::Error {
            let reason = occupant.error.unwrap_or_default();
            if room.state == RoomState::Joining {
                warn!(room = %id, error = %reason, "join rejected");
                self.rooms.remove(&id);
                return vec![EventPayload::RoomError {
                    message: format!("could not join {id}: {reason}"),
                    room_id: id,
                }];
            }
            return vec![EventPayload::RoomError {
                message: format!("{id}: {reason}"),
                room_id: id,
            }];
        }

        if room.state == RoomState::Left {
            debug!(room = %id, handle = %occupant.handle, "presence for a room we left");
            return Vec::new();
        }
        if occupant.handle.is_empty() {
            return Vec::new();
        }

        let is_self = occupant.has_code(status::SELF_PRESENCE) || occupant.handle == room.handle;
        match occupant.kind {
            OccupantPresenceKind::Unavailable => occupant_left(room, occupant, is_self),
            _ => occupant_present(room, occupant, is_self),
        }
    }

    /// Apply a `groupchat` message from a tracked room.
    pub fn handle_message(&mut self, message: &Element) -> Vec<EventPayload> {
        let parsed = ChatMessage::parse(message);
        let Some(id) = RoomId::parse(&parsed.from) else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&id) else {
            debug!(room = %id, "message for unknown room");
            return Vec::new();
        };

        if parsed.kind == MessageKind::Error {
            return vec![EventPayload::RoomError {
                message: format!("{id}: {}", parsed.error.unwrap_or_default()),
                room_id: id,
            }];
        }

        let handle = parsed
            .from
            .split_once('/')
            .map(|(_, handle)| handle.to_string())
            .filter(|handle| !handle.is_empty());

        let mut events = Vec::new();
        if let Some(subject) = &parsed.subject {
            room.topic = Some(subject.clone());
            room.topic_setter = handle.clone();
            events.push(EventPayload::RoomTopicChanged {
                room_id: id.clone(),
                who: handle.clone(),
                topic: subject.clone(),
            });
        }
        if let Some(body) = &parsed.body {
            events.push(EventPayload::MessageReceived {
                from: parsed.from.clone(),
                body: body.clone(),
                flags: parsed.flags(),
                timestamp: parsed.timestamp(Utc::now()),
            });
        }
        events
    }

    pub fn groupchat(&self, id: &RoomId, body: &str) -> Result<Element, MucError> {
        let room = self.present_room(id)?;
        Ok(groupchat_message(&room.id.address(), body))
    }

    pub fn set_topic(&self, id: &RoomId, topic: &str) -> Result<Element, MucError> {
        let room = self.present_room(id)?;
        Ok(Element::new("message", ns::CLIENT)
            .with_attr("to", room.id.address())
            .with_attr("type", MessageKind::Groupchat.as_str())
            .with_child(Element::new("subject", ns::CLIENT).with_text(topic)))
    }

    /// Presence to our new occupant address. The room confirms with a 303.
    pub fn change_nick(&self, id: &RoomId, new_handle: &str) -> Result<Element, MucError> {
        let room = self.present_room(id)?;
        validate_handle(&bare_address(&room.id.address())?, new_handle)?;
        Ok(Element::new("presence", ns::CLIENT).with_attr("to", room.occupant_address(new_handle)))
    }

    /// Mediated invitation sent through the room.
    pub fn invite(&self, id: &RoomId, address: &str, reason: Option<&str>) -> Result<Element, MucError> {
        let room = self.present_room(id)?;
        let invitee = bare_address(address)?;
        let mut invite = Element::new("invite", ns::MUC_USER).with_attr("to", invitee.to_string());
        if let Some(reason) = reason {
            invite.push_child(Element::new("reason", ns::MUC_USER).with_text(reason));
        }
        Ok(Element::new("message", ns::CLIENT)
            .with_attr("to", room.id.address())
            .with_child(Element::new("x", ns::MUC_USER).with_child(invite)))
    }

    fn member(&self, id: &RoomId, handle: &str) -> Result<(&Room, &Member), MucError> {
        let room = self
            .rooms
            .get(id)
            .ok_or_else(|| MucError::UnknownRoom(id.clone()))?;
        let member = room.member(handle).ok_or_else(|| MucError::UnknownMember {
            room: id.clone(),
            handle: handle.to_string(),
        })?;
        Ok((room, member))
    }

    fn real_address<'a>(id: &RoomId, member: &'a Member) -> Result<&'a str, MucError> {
        member
            .real_address
            .as_deref()
            .ok_or_else(|| MucError::RealAddressUnknown {
                room: id.clone(),
                handle: member.handle.clone(),
            })
    }

    pub fn kick(&self, id: &RoomId, handle: &str, reason: Option<&str>) -> Result<Element, MucError> {
        self.set_role(id, handle, MucRole::None, reason)
    }

    pub fn ban(&self, id: &RoomId, handle: &str, reason: Option<&str>) -> Result<Element, MucError> {
        self.set_affiliation(id, handle, MucAffiliation::Outcast, reason)
    }

    pub fn set_role(
        &self,
        id: &RoomId,
        handle: &str,
        role: MucRole,
        reason: Option<&str>,
    ) -> Result<Element, MucError> {
        let (room, member) = self.member(id, handle)?;
        let item = Element::new("item", ns::MUC_ADMIN)
            .with_attr("nick", member.handle.as_str())
            .with_attr("role", role.as_str());
        Ok(admin_query(room, item, reason))
    }

    pub fn set_affiliation(
        &self,
        id: &RoomId,
        handle: &str,
        affiliation: MucAffiliation,
        reason: Option<&str>,
    ) -> Result<Element, MucError> {
        let (room, member) = self.member(id, handle)?;
        let item = Element::new("item", ns::MUC_ADMIN)
            .with_attr("jid", Self::real_address(id, member)?)
            .with_attr("affiliation", affiliation.as_str());
        Ok(admin_query(room, item, reason))
    }

    /// Room address for an owner or registration query; the room must be
    /// tracked.
    pub fn query_target(&self, id: &RoomId) -> Result<String, MucError> {
        self.rooms
            .get(id)
            .map(|room| room.id.address())
            .ok_or_else(|| MucError::UnknownRoom(id.clone()))
    }

    /// Record that the room sent a form. Configuration forms move a present
    /// room to `Configuring`.
    pub fn open_form(&mut self, id: &RoomId, form: PendingForm) {
        if let Some(room) = self.rooms.get_mut(id) {
            room.pending_form = Some(form);
            if form == PendingForm::Configuration && room.state.is_present() {
                room.state = RoomState::Configuring;
            }
        }
    }

    /// Take the pending form of the given kind, returning the room to
    /// `Joined` if it was being configured.
    pub fn close_form(
        &mut self,
        id: &RoomId,
        form: PendingForm,
    ) -> Result<String, MucError> {
        let room = self.room_mut(id)?;
        if room.pending_form != Some(form) {
            return Err(MucError::NoPendingForm(id.clone()));
        }
        room.pending_form = None;
        if room.state == RoomState::Configuring {
            room.state = RoomState::Joined;
        }
        Ok(room.id.address())
    }
}

fn join_presence(room: &Room) -> Element {
    let mut muc = Element::new("x", ns::MUC);
    if let Some(password) = &room.password {
        muc.push_child(Element::new("password", ns::MUC).with_text(password.as_str()));
    }
    Element::new("presence", ns::CLIENT)
        .with_attr("to", room.own_address())
        .with_child(muc)
}

fn part_presence(room: &Room, message: Option<&str>) -> Element {
    let mut presence = Element::new("presence", ns::CLIENT)
        .with_attr("to", room.own_address())
        .with_attr("type", "unavailable");
    if let Some(message) = message {
        presence.push_child(Element::new("status", ns::CLIENT).with_text(message));
    }
    presence
}

fn admin_query(room: &Room, mut item: Element, reason: Option<&str>) -> Element {
    if let Some(reason) = reason {
        item.push_child(Element::new("reason", ns::MUC_ADMIN).with_text(reason));
    }
    iq(IqType::Set)
        .with_attr("to", room.id.address())
        .with_child(Element::new("query", ns::MUC_ADMIN).with_child(item))
}

fn removal_notice(room: &RoomId, who: &str, occupant: &OccupantPresence) -> Option<EventPayload> {
    let action = if occupant.has_code(status::BANNED) {
        "banned from"
    } else if occupant.has_code(status::KICKED) {
        "kicked from"
    } else {
        return None;
    };
    let mut message = format!("{who} {} {action} {room}", if who == "You" { "were" } else { "was" });
    if let Some(actor) = &occupant.actor {
        message.push_str(&format!(" by {actor}"));
    }
    if let Some(reason) = &occupant.reason {
        message.push_str(&format!(": {reason}"));
    }
    Some(EventPayload::RoomNotice {
        room_id: room.clone(),
        message,
    })
}

fn occupant_left(room: &mut Room, occupant: OccupantPresence, is_self: bool) -> Vec<EventPayload> {
    let id = room.id.clone();

    if occupant.has_code(status::NICK_CHANGED) {
        if let Some(new_handle) = occupant.new_handle.clone().filter(|handle| !handle.is_empty()) {
            if is_self {
                room.handle = new_handle.clone();
            }
            room.rename_handle(&occupant.handle, &new_handle);
            return vec![EventPayload::MemberRenamed {
                room_id: id,
                old_handle: occupant.handle,
                new_handle,
            }];
        }
    }

    if is_self {
        let mut events: Vec<EventPayload> = removal_notice(&id, "You", &occupant).into_iter().collect();
        room.state = RoomState::Left;
        room.pending_form = None;
        room.clear_members();
        info!(room = %id, "left room");
        events.push(EventPayload::RoomLeft { room_id: id });
        return events;
    }

    let mut events: Vec<EventPayload> = removal_notice(&id, &occupant.handle, &occupant).into_iter().collect();
    if room.remove_handle(&occupant.handle).is_some() {
        events.push(EventPayload::MemberLeft {
            room_id: id,
            handle: occupant.handle,
        });
    }
    events
}

fn occupant_present(room: &mut Room, occupant: OccupantPresence, is_self: bool) -> Vec<EventPayload> {
    let id = room.id.clone();
    let mut events = Vec::new();

    let member = Member {
        handle: occupant.handle.clone(),
        real_address: occupant.real_address.clone(),
        affiliation: occupant.affiliation,
        role: occupant.role,
        show: occupant.show,
        status: occupant.status.clone(),
    };
    let update = room.track_handle(member);

    if is_self {
        if occupant.has_code(status::ROOM_CREATED) && room.state == RoomState::Joining {
            events.push(EventPayload::RoomCreated { room_id: id.clone() });
        }
        if room.state == RoomState::Joining {
            room.state = RoomState::Joined;
            info!(room = %id, handle = %room.handle, "joined room");
            events.push(EventPayload::RoomJoined { room_id: id });
            return events;
        }
    }

    match update {
        MemberUpdate::Joined => events.push(EventPayload::MemberJoined {
            room_id: id,
            handle: occupant.handle,
        }),
        MemberUpdate::Changed => events.push(EventPayload::MemberStatusChanged {
            room_id: id,
            handle: occupant.handle,
            show: occupant.show,
            status: occupant.status,
        }),
        MemberUpdate::Unchanged => {
            debug!(room = %id, handle = %occupant.handle, "suppressing repeated status");
        }
    }
    events
}
