pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;

pub use command::Command;
pub use error::{EventBusError, NatterError, Result};
pub use event::{Event, EventPayload, RoomId};
