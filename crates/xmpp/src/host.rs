use natter_core::EventPayload;

use crate::element::Element;
use crate::error::ConnectionError;
use crate::iq::Continuation;

/// What a protocol component needs from the connection that owns it.
///
/// Roster and room logic live in their own crates and reach the wire, the
/// correlator and the event boundary only through this trait, so each of
/// them can be driven by a test double as well as by the real connection.
pub trait XmppHost: Sized + 'static {
    /// Serialize and write one stanza.
    fn send(&mut self, stanza: Element) -> Result<(), ConnectionError>;

    /// Send an iq through the correlator; `continuation` runs when the
    /// matching reply arrives, never before this call returns.
    fn send_query(
        &mut self,
        stanza: Element,
        continuation: Continuation<Self>,
    ) -> Result<String, ConnectionError>;

    /// Push an event to the application layer.
    fn emit(&mut self, payload: EventPayload);
}
