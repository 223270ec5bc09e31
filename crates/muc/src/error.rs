use natter_core::event::RoomId;
use natter_xmpp::{ConnectionError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MucError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no session for room {0}")]
    UnknownRoom(RoomId),

    #[error("{handle} is not in room {room}")]
    UnknownMember { room: RoomId, handle: String },

    #[error("the real address of {handle} in room {room} is not known")]
    RealAddressUnknown { room: RoomId, handle: String },

    #[error("room {0} has no form awaiting an answer")]
    NoPendingForm(RoomId),

    #[error("not present in room {0}")]
    NotJoined(RoomId),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
