use natter_xmpp::{ConnectionError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} is not on the buddy list")]
    UnknownContact(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
