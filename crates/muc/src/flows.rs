//! Room operations that talk to the network: joins and parts, moderation,
//! configuration and registration forms, room directory.

use natter_core::EventPayload;
use natter_core::event::{FormField, MucAffiliation, MucRole, RoomId, RoomListing};
use natter_xmpp::form::{cancel_form, find_form, submit_form};
use natter_xmpp::stanza::{IqType, error_description, iq};
use natter_xmpp::{Element, XmppHost, ns};
use tracing::{debug, warn};

use crate::error::MucError;
use crate::manager::MucManager;
use crate::room::PendingForm;

/// A connection that owns a room table.
pub trait MucHost: XmppHost {
    fn muc(&mut self) -> &mut MucManager;
}

pub fn join_room<H: MucHost>(
    host: &mut H,
    room: &str,
    server: &str,
    handle: &str,
    password: Option<String>,
) -> Result<(), MucError> {
    if let Some(presence) = host.muc().join(room, server, handle, password)? {
        host.send(presence)?;
    }
    Ok(())
}

pub fn leave_room<H: MucHost>(host: &mut H, id: &RoomId, message: Option<&str>) -> Result<(), MucError> {
    if let Some(presence) = host.muc().part(id, message)? {
        host.send(presence)?;
        host.emit(EventPayload::RoomLeft { room_id: id.clone() });
    }
    Ok(())
}

pub fn close_room<H: MucHost>(host: &mut H, id: &RoomId) -> Result<(), MucError> {
    if let Some(presence) = host.muc().close(id)? {
        host.send(presence)?;
        host.emit(EventPayload::RoomLeft { room_id: id.clone() });
    }
    Ok(())
}

pub fn send_groupchat<H: MucHost>(host: &mut H, id: &RoomId, body: &str) -> Result<(), MucError> {
    let message = host.muc().groupchat(id, body)?;
    host.send(message)?;
    Ok(())
}

pub fn set_topic<H: MucHost>(host: &mut H, id: &RoomId, topic: &str) -> Result<(), MucError> {
    let message = host.muc().set_topic(id, topic)?;
    host.send(message)?;
    Ok(())
}

pub fn change_nick<H: MucHost>(host: &mut H, id: &RoomId, new_handle: &str) -> Result<(), MucError> {
    let presence = host.muc().change_nick(id, new_handle)?;
    host.send(presence)?;
    Ok(())
}

pub fn invite<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    address: &str,
    reason: Option<&str>,
) -> Result<(), MucError> {
    let message = host.muc().invite(id, address, reason)?;
    host.send(message)?;
    Ok(())
}

/// Send an IQ whose only interesting reply is an error, reported against
/// the room as `"could not {action} in {room}: ..."`.
fn send_room_query<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    stanza: Element,
    action: &'static str,
) -> Result<String, MucError> {
    let room_id = id.clone();
    let query_id = host.send_query(
        stanza,
        Box::new(move |host: &mut H, reply: Element| {
            if IqType::of(&reply) == Some(IqType::Error) {
                report_error(host, room_id, action, &reply);
            }
        }),
    )?;
    debug!(room = %id, id = %query_id, action, "sent room query");
    Ok(query_id)
}

fn report_error<H: MucHost>(host: &mut H, room_id: RoomId, action: &str, reply: &Element) {
    let message = format!("could not {action} in {room_id}: {}", error_description(reply));
    warn!(room = %room_id, error = %message, "room request failed");
    host.emit(EventPayload::RoomError { room_id, message });
}

pub fn kick_member<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    handle: &str,
    reason: Option<&str>,
) -> Result<String, MucError> {
    let stanza = host.muc().kick(id, handle, reason)?;
    send_room_query(host, id, stanza, "kick")
}

pub fn ban_member<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    handle: &str,
    reason: Option<&str>,
) -> Result<String, MucError> {
    let stanza = host.muc().ban(id, handle, reason)?;
    send_room_query(host, id, stanza, "ban")
}

pub fn set_affiliation<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    handle: &str,
    affiliation: MucAffiliation,
    reason: Option<&str>,
) -> Result<String, MucError> {
    let stanza = host.muc().set_affiliation(id, handle, affiliation, reason)?;
    send_room_query(host, id, stanza, "change affiliation")
}

pub fn set_role<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    handle: &str,
    role: MucRole,
    reason: Option<&str>,
) -> Result<String, MucError> {
    let stanza = host.muc().set_role(id, handle, role, reason)?;
    send_room_query(host, id, stanza, "change role")
}

fn owner_query(to: String, kind: IqType, payload: Option<Element>) -> Element {
    let mut query = Element::new("query", ns::MUC_OWNER);
    if let Some(payload) = payload {
        query.push_child(payload);
    }
    iq(kind).with_attr("to", to).with_child(query)
}

fn register_query(to: String, kind: IqType, payload: Option<Element>) -> Element {
    let mut query = Element::new("query", ns::REGISTER);
    if let Some(payload) = payload {
        query.push_child(payload);
    }
    iq(kind).with_attr("to", to).with_child(query)
}

/// Fetch the room's configuration form.
pub fn request_room_configuration<H: MucHost>(host: &mut H, id: &RoomId) -> Result<String, MucError> {
    let to = host.muc().query_target(id)?;
    let room_id = id.clone();
    let query_id = host.send_query(
        owner_query(to, IqType::Get, None),
        Box::new(move |host: &mut H, reply: Element| {
            on_form_reply(host, room_id, PendingForm::Configuration, &reply)
        }),
    )?;
    Ok(query_id)
}

pub fn submit_room_configuration<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    fields: &[FormField],
) -> Result<String, MucError> {
    let to = host.muc().close_form(id, PendingForm::Configuration)?;
    let stanza = owner_query(to, IqType::Set, Some(submit_form(fields)));
    send_room_query(host, id, stanza, "configure")
}

pub fn cancel_room_configuration<H: MucHost>(host: &mut H, id: &RoomId) -> Result<String, MucError> {
    let to = host.muc().close_form(id, PendingForm::Configuration)?;
    let stanza = owner_query(to, IqType::Set, Some(cancel_form()));
    send_room_query(host, id, stanza, "cancel configuration")
}

/// Accept the default configuration of a newly created room.
pub fn create_instant_room<H: MucHost>(host: &mut H, id: &RoomId) -> Result<String, MucError> {
    let to = host.muc().query_target(id)?;
    let stanza = owner_query(to, IqType::Set, Some(submit_form(&[])));
    send_room_query(host, id, stanza, "create instant room")
}

/// Fetch the room's registration form.
pub fn register_with_room<H: MucHost>(host: &mut H, id: &RoomId) -> Result<String, MucError> {
    let to = host.muc().query_target(id)?;
    let room_id = id.clone();
    let query_id = host.send_query(
        register_query(to, IqType::Get, None),
        Box::new(move |host: &mut H, reply: Element| {
            on_form_reply(host, room_id, PendingForm::Registration, &reply)
        }),
    )?;
    Ok(query_id)
}

pub fn submit_room_registration<H: MucHost>(
    host: &mut H,
    id: &RoomId,
    fields: &[FormField],
) -> Result<String, MucError> {
    let to = host.muc().close_form(id, PendingForm::Registration)?;
    let stanza = register_query(to, IqType::Set, Some(submit_form(fields)));
    send_room_query(host, id, stanza, "register")
}

fn on_form_reply<H: MucHost>(host: &mut H, room_id: RoomId, kind: PendingForm, reply: &Element) {
    let (action, missing) = match kind {
        PendingForm::Configuration => ("configure", "configuration"),
        PendingForm::Registration => ("register", "registration"),
    };
    if IqType::of(reply) == Some(IqType::Error) {
        report_error(host, room_id, action, reply);
        return;
    }

    let form = reply
        .get_child("query", ns::MUC_OWNER)
        .or_else(|| reply.get_child("query", ns::REGISTER))
        .and_then(find_form);
    let Some(form) = form else {
        host.emit(EventPayload::RoomNotice {
            message: format!("{room_id} does not support {missing}"),
            room_id,
        });
        return;
    };

    host.muc().open_form(&room_id, kind);
    let payload = match kind {
        PendingForm::Configuration => EventPayload::RoomConfigurationRequested { room_id, form },
        PendingForm::Registration => EventPayload::RoomRegistrationRequested { room_id, form },
    };
    host.emit(payload);
}

/// Ask a conference server for its rooms.
pub fn request_room_list<H: MucHost>(host: &mut H, server: &str) -> Result<String, MucError> {
    natter_xmpp::address::bare_address(server)?;
    let server = server.to_string();
    let stanza = iq(IqType::Get)
        .with_attr("to", server.as_str())
        .with_child(Element::new("query", ns::DISCO_ITEMS));
    let query_id = host.send_query(
        stanza,
        Box::new(move |host: &mut H, reply: Element| {
            if IqType::of(&reply) == Some(IqType::Error) {
                warn!(server = %server, error = %error_description(&reply), "room list request failed");
            }
            let rooms = reply
                .get_child("query", ns::DISCO_ITEMS)
                .map(|query| {
                    query
                        .children_named("item", ns::DISCO_ITEMS)
                        .filter_map(|item| {
                            Some(RoomListing {
                                address: item.attr("jid")?.to_string(),
                                name: item.attr("name").map(str::to_string),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            host.emit(EventPayload::RoomListReceived { server, rooms });
        }),
    )?;
    Ok(query_id)
}

pub fn handle_presence<H: MucHost>(host: &mut H, presence: &Element) {
    for event in host.muc().handle_presence(presence) {
        host.emit(event);
    }
}

pub fn handle_message<H: MucHost>(host: &mut H, message: &Element) {
    for event in host.muc().handle_message(message) {
        host.emit(event);
    }
}

/// Connection teardown: every room record goes away.
pub fn leave_all<H: MucHost>(host: &mut H) {
    for room_id in host.muc().clear() {
        host.emit(EventPayload::RoomLeft { room_id });
    }
}
