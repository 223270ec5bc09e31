use natter_core::RoomId;
use natter_muc::MucError;
use natter_roster::RosterError;
use natter_xmpp::{ConnectionError, ValidationError};
use thiserror::Error;

/// Why a command was refused. Refused commands write nothing.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cannot {0} before the session is established")]
    NotBound(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} is not on the buddy list")]
    UnknownContact(String),

    #[error("no session for room {0}")]
    UnknownRoom(RoomId),

    #[error("{handle} is not in room {room}")]
    UnknownMember { room: RoomId, handle: String },

    #[error(transparent)]
    Room(MucError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl From<MucError> for CommandError {
    fn from(error: MucError) -> Self {
        match error {
            MucError::Validation(error) => CommandError::Validation(error),
            MucError::UnknownRoom(room) => CommandError::UnknownRoom(room),
            MucError::UnknownMember { room, handle } => CommandError::UnknownMember { room, handle },
            MucError::Connection(error) => CommandError::Connection(error),
            other => CommandError::Room(other),
        }
    }
}

impl From<RosterError> for CommandError {
    fn from(error: RosterError) -> Self {
        match error {
            RosterError::Validation(error) => CommandError::Validation(error),
            RosterError::UnknownContact(address) => CommandError::UnknownContact(address),
            RosterError::Connection(error) => CommandError::Connection(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn room_errors_keep_their_shape() {
        let room = RoomId::new("chapel", "conference.verona.lit");
        let error: CommandError = MucError::UnknownMember {
            room: room.clone(),
            handle: "tybalt".to_string(),
        }
        .into();
        assert_matches!(error, CommandError::UnknownMember { ref handle, .. } if handle == "tybalt");

        let error: CommandError = MucError::NoPendingForm(room).into();
        assert_matches!(error, CommandError::Room(MucError::NoPendingForm(_)));
        assert_eq!(
            error.to_string(),
            "room chapel@conference.verona.lit has no form awaiting an answer"
        );
    }

    #[test]
    fn roster_validation_is_flattened() {
        let error: CommandError =
            RosterError::Validation(ValidationError::Address("@".to_string())).into();
        assert_matches!(error, CommandError::Validation(ValidationError::Address(_)));
    }
}
