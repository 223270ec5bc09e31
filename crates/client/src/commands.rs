use natter_core::Command;
use natter_muc::flows as muc;
use natter_roster::flows as roster;
use natter_xmpp::address::parse_address;
use natter_xmpp::message::chat_message;
use natter_xmpp::{XmppHost, XmppTransport};
use tracing::debug;

use crate::connection::Connection;
use crate::error::CommandError;

impl<T: XmppTransport> Connection<T> {
    /// Carry out one command from the application shell.
    ///
    /// Everything except [`Command::Disconnect`] needs an established
    /// session. A refused command writes nothing.
    pub fn handle_command(&mut self, command: Command) -> Result<(), CommandError> {
        debug!(command = command.name(), "handling command");
        if command == Command::Disconnect {
            self.disconnect();
            return Ok(());
        }
        if !self.stream.is_bound() {
            return Err(CommandError::NotBound(command.name()));
        }

        match command {
            Command::SendMessage { to, body } => {
                let to = parse_address(&to)?;
                self.send(chat_message(&to.to_string(), &body))?;
            }
            Command::SendGroupchatMessage { room_id, body } => {
                muc::send_groupchat(self, &room_id, &body)?;
            }
            Command::JoinRoom {
                room,
                server,
                handle,
                password,
            } => muc::join_room(self, &room, &server, &handle, password)?,
            Command::LeaveRoom { room_id, message } => {
                muc::leave_room(self, &room_id, message.as_deref())?;
            }
            Command::CloseRoom { room_id } => muc::close_room(self, &room_id)?,
            Command::SetTopic { room_id, topic } => muc::set_topic(self, &room_id, &topic)?,
            Command::ChangeNick { room_id, new_nick } => {
                muc::change_nick(self, &room_id, &new_nick)?;
            }
            Command::InviteToRoom {
                room_id,
                address,
                reason,
            } => muc::invite(self, &room_id, &address, reason.as_deref())?,
            Command::KickMember {
                room_id,
                handle,
                reason,
            } => {
                muc::kick_member(self, &room_id, &handle, reason.as_deref())?;
            }
            Command::BanMember {
                room_id,
                handle,
                reason,
            } => {
                muc::ban_member(self, &room_id, &handle, reason.as_deref())?;
            }
            Command::SetAffiliation {
                room_id,
                handle,
                affiliation,
                reason,
            } => {
                muc::set_affiliation(self, &room_id, &handle, affiliation, reason.as_deref())?;
            }
            Command::SetRole {
                room_id,
                handle,
                role,
                reason,
            } => {
                muc::set_role(self, &room_id, &handle, role, reason.as_deref())?;
            }
            Command::RequestRoomConfiguration { room_id } => {
                muc::request_room_configuration(self, &room_id)?;
            }
            Command::SubmitRoomConfiguration { room_id, fields } => {
                muc::submit_room_configuration(self, &room_id, &fields)?;
            }
            Command::CancelRoomConfiguration { room_id } => {
                muc::cancel_room_configuration(self, &room_id)?;
            }
            Command::CreateInstantRoom { room_id } => {
                muc::create_instant_room(self, &room_id)?;
            }
            Command::RegisterWithRoom { room_id } => {
                muc::register_with_room(self, &room_id)?;
            }
            Command::SubmitRoomRegistration { room_id, fields } => {
                muc::submit_room_registration(self, &room_id, &fields)?;
            }
            Command::RequestRoomList { server } => {
                let server = server.unwrap_or_else(|| self.default_conference_server.clone());
                muc::request_room_list(self, &server)?;
            }
            Command::AddBuddy {
                address,
                alias,
                group,
            } => roster::add_buddy(self, &address, alias, group)?,
            Command::RemoveBuddy { address } => roster::remove_buddy(self, &address)?,
            Command::ChangeGroup { address, new_group } => {
                roster::change_group(self, &address, &new_group)?;
            }
            Command::SetAlias { address, alias } => roster::set_alias(self, &address, alias)?,
            Command::RenameGroup { old, new } => {
                let moved = roster::rename_group(self, &old, &new)?;
                debug!(old = %old, new = %new, moved, "renamed group");
            }
            Command::AuthorizeSubscription { address, allow } => {
                roster::authorize_subscription(self, &address, allow)?;
            }
            Command::Disconnect => {}
        }
        Ok(())
    }
}
