//! Multi-user chat: one session record per joined or joining room, kept in
//! step with the presence the room sends back.

pub mod error;
pub mod flows;
pub mod manager;
pub mod occupant;
pub mod room;

pub use error::MucError;
pub use flows::MucHost;
pub use manager::MucManager;
pub use occupant::OccupantPresence;
pub use room::{Member, MemberUpdate, PendingForm, Room, RoomState};
