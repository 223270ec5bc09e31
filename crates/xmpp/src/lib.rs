pub mod address;
pub mod element;
pub mod error;
pub mod form;
pub mod host;
pub mod iq;
pub mod message;
pub mod ns;
pub mod parser;
pub mod sasl;
pub mod stanza;
pub mod stream;
pub mod transport;

pub use element::{Attribute, Element, Node};
pub use error::{ConnectionError, ParseError, ValidationError};
pub use host::XmppHost;
pub use iq::{Continuation, IqTracker};
pub use parser::{ParseEvent, StanzaTreeBuilder, StreamHeader};
pub use sasl::SelectedMechanism;
pub use stanza::{IqType, Stanza};
pub use stream::{
    AuthMechanism, NegotiationStep, StreamAction, StreamCredentials, StreamMachine, StreamPhase,
};
pub use transport::XmppTransport;
