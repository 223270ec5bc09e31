use natter_core::event::ConnectionErrorKind;
use thiserror::Error;

/// Malformed inbound XML. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid UTF-8 in stream")]
    InvalidUtf8,

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedTag { expected: String, found: String },

    #[error("closing tag </{0}> without an open element")]
    UnexpectedClose(String),

    #[error("undeclared namespace prefix '{0}'")]
    UnboundPrefix(String),

    #[error("stanza exceeds the {limit} byte limit")]
    StanzaTooLarge { limit: usize },

    #[error("builder failed earlier and must be reset")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// A negotiation element arrived in a phase that does not expect it.
    #[error("protocol error: unexpected {element} while {phase}")]
    UnexpectedNegotiation { element: String, phase: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("not connected")]
    NotConnected,
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::AuthenticationFailed(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::UnexpectedNegotiation { .. }
        )
    }

    pub fn kind(&self) -> ConnectionErrorKind {
        match self {
            ConnectionError::Protocol(_) | ConnectionError::UnexpectedNegotiation { .. } => {
                ConnectionErrorKind::Protocol
            }
            ConnectionError::AuthenticationFailed(_) => ConnectionErrorKind::Authentication,
            ConnectionError::StreamError(_) => ConnectionErrorKind::Stream,
            ConnectionError::TransportError(_) | ConnectionError::NotConnected => {
                ConnectionErrorKind::Transport
            }
        }
    }
}

/// A locally built request carries an invalid identifier; nothing was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is not a valid room name")]
    Room(String),

    #[error("{0} is not a valid server name")]
    Server(String),

    #[error("{0} is not a valid room handle")]
    Handle(String),

    #[error("{0} is not a valid address")]
    Address(String),
}
