pub mod error;
pub mod flows;
pub mod item;
pub mod presence;
pub mod synchronizer;

pub use error::RosterError;
pub use flows::RosterHost;
pub use item::RosterItem;
pub use presence::{PresenceBook, PresenceInfo, PresenceTransition};
pub use synchronizer::{RosterChange, RosterEntry, RosterSynchronizer};
