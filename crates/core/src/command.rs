use serde::{Deserialize, Serialize};

use crate::event::{FormField, MucAffiliation, MucRole, RoomId};

/// A request issued by the application shell into one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Command {
    // ── Messaging ──────────────────────────────────────────────────
    SendMessage {
        to: String,
        body: String,
    },
    SendGroupchatMessage {
        room_id: RoomId,
        body: String,
    },

    // ── Rooms ──────────────────────────────────────────────────────
    JoinRoom {
        room: String,
        server: String,
        handle: String,
        password: Option<String>,
    },
    LeaveRoom {
        room_id: RoomId,
        message: Option<String>,
    },
    /// Destroy the room session, leaving first if still present.
    CloseRoom {
        room_id: RoomId,
    },
    SetTopic {
        room_id: RoomId,
        topic: String,
    },
    ChangeNick {
        room_id: RoomId,
        new_nick: String,
    },
    InviteToRoom {
        room_id: RoomId,
        address: String,
        reason: Option<String>,
    },
    KickMember {
        room_id: RoomId,
        handle: String,
        reason: Option<String>,
    },
    BanMember {
        room_id: RoomId,
        handle: String,
        reason: Option<String>,
    },
    SetAffiliation {
        room_id: RoomId,
        handle: String,
        affiliation: MucAffiliation,
        reason: Option<String>,
    },
    SetRole {
        room_id: RoomId,
        handle: String,
        role: MucRole,
        reason: Option<String>,
    },
    RequestRoomConfiguration {
        room_id: RoomId,
    },
    SubmitRoomConfiguration {
        room_id: RoomId,
        fields: Vec<FormField>,
    },
    CancelRoomConfiguration {
        room_id: RoomId,
    },
    CreateInstantRoom {
        room_id: RoomId,
    },
    RegisterWithRoom {
        room_id: RoomId,
    },
    SubmitRoomRegistration {
        room_id: RoomId,
        fields: Vec<FormField>,
    },
    RequestRoomList {
        server: Option<String>,
    },

    // ── Roster ─────────────────────────────────────────────────────
    AddBuddy {
        address: String,
        alias: Option<String>,
        group: Option<String>,
    },
    RemoveBuddy {
        address: String,
    },
    ChangeGroup {
        address: String,
        new_group: String,
    },
    SetAlias {
        address: String,
        alias: Option<String>,
    },
    RenameGroup {
        old: String,
        new: String,
    },
    AuthorizeSubscription {
        address: String,
        allow: bool,
    },

    // ── Connection ─────────────────────────────────────────────────
    Disconnect,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SendMessage { .. } => "send_message",
            Command::SendGroupchatMessage { .. } => "send_groupchat_message",
            Command::JoinRoom { .. } => "join_room",
            Command::LeaveRoom { .. } => "leave_room",
            Command::CloseRoom { .. } => "close_room",
            Command::SetTopic { .. } => "set_topic",
            Command::ChangeNick { .. } => "change_nick",
            Command::InviteToRoom { .. } => "invite_to_room",
            Command::KickMember { .. } => "kick_member",
            Command::BanMember { .. } => "ban_member",
            Command::SetAffiliation { .. } => "set_affiliation",
            Command::SetRole { .. } => "set_role",
            Command::RequestRoomConfiguration { .. } => "request_room_configuration",
            Command::SubmitRoomConfiguration { .. } => "submit_room_configuration",
            Command::CancelRoomConfiguration { .. } => "cancel_room_configuration",
            Command::CreateInstantRoom { .. } => "create_instant_room",
            Command::RegisterWithRoom { .. } => "register_with_room",
            Command::SubmitRoomRegistration { .. } => "submit_room_registration",
            Command::RequestRoomList { .. } => "request_room_list",
            Command::AddBuddy { .. } => "add_buddy",
            Command::RemoveBuddy { .. } => "remove_buddy",
            Command::ChangeGroup { .. } => "change_group",
            Command::SetAlias { .. } => "set_alias",
            Command::RenameGroup { .. } => "rename_group",
            Command::AuthorizeSubscription { .. } => "authorize_subscription",
            Command::Disconnect => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let json = r#"{"type":"joinRoom","data":{"room":"lobby","server":"muc.example.com","handle":"me","password":null}}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            Command::JoinRoom {
                room: "lobby".to_string(),
                server: "muc.example.com".to_string(),
                handle: "me".to_string(),
                password: None,
            }
        );
        assert_eq!(command.name(), "join_room");
    }

    #[test]
    fn unit_command_serializes_without_data() {
        let json = serde_json::to_string(&Command::Disconnect).unwrap();
        assert_eq!(json, r#"{"type":"disconnect"}"#);
    }
}
