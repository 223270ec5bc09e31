//! Per-account connection runtime.
//!
//! [`Connection`] owns every piece of protocol state for one account and is
//! driven synchronously: bytes in through [`Connection::on_bytes`], commands
//! in through [`Connection::handle_command`], stanzas out through its
//! transport and events out through the bus. [`driver`] runs it on tokio.

mod commands;
pub mod connection;
mod dispatcher;
pub mod driver;
pub mod error;

pub use connection::Connection;
pub use driver::{ChannelTransport, ClientHandle, Driver, Outbound, client, connect};
pub use error::CommandError;
