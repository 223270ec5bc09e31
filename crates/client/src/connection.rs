//! One account's connection: stream lifecycle, correlator, roster mirror,
//! buddy presence and room table behind a single owner.
//!
//! The connection is fed bytes and commands from outside and writes through
//! its transport. It never blocks and never spawns; [`crate::driver`] wires
//! it to a socket.

use std::sync::Arc;

use jid::{BareJid, FullJid};
use natter_core::config::Config;
use natter_core::event::{EventBus, EventSource};
use natter_core::{Event, EventPayload};
use natter_muc::{MucHost, MucManager};
use natter_roster::{PresenceBook, RosterError, RosterHost, RosterSynchronizer};
use natter_xmpp::address::bare_address;
use natter_xmpp::stream::STREAM_CLOSE;
use natter_xmpp::{
    AuthMechanism, ConnectionError, Continuation, Element, IqTracker, NegotiationStep, ParseEvent,
    StreamAction, StreamCredentials, StreamMachine, StreamPhase, ValidationError, XmppHost,
    XmppTransport,
};
use tracing::{debug, error, info, trace, warn};

/// Whether the rest of a read batch may still be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The stream was restarted; bytes after this point belong to the old
    /// stream.
    Restarted,
}

pub struct Connection<T: XmppTransport> {
    pub(crate) transport: T,
    pub(crate) stream: StreamMachine,
    pub(crate) iq: IqTracker<Connection<T>>,
    pub(crate) roster: RosterSynchronizer,
    pub(crate) presence: PresenceBook,
    pub(crate) muc: MucManager,
    bus: Arc<dyn EventBus>,
    pub(crate) default_conference_server: String,
}

impl<T: XmppTransport> Connection<T> {
    pub fn new(
        config: &Config,
        transport: T,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self, ValidationError> {
        let account = bare_address(&config.account.jid)?;
        let credentials = StreamCredentials {
            jid: account.clone(),
            password: config.account.password.clone(),
            resource: config.account.resource.clone(),
            allow_plaintext_auth: config.account.allow_plaintext_auth,
        };

        Ok(Self {
            transport,
            stream: StreamMachine::new(credentials)
                .with_max_stanza_size(config.stream.max_stanza_size),
            iq: IqTracker::new(),
            roster: RosterSynchronizer::new(account, config.roster.default_group.clone()),
            presence: PresenceBook::new(),
            muc: MucManager::new(),
            bus,
            default_conference_server: config.muc.default_server.clone(),
        })
    }

    pub fn account(&self) -> &BareJid {
        self.stream.account()
    }

    pub fn phase(&self) -> StreamPhase {
        self.stream.phase()
    }

    pub fn mechanism(&self) -> Option<AuthMechanism> {
        self.stream.mechanism()
    }

    pub fn bound_jid(&self) -> Option<&FullJid> {
        self.stream.bound_jid()
    }

    pub fn contacts(&self) -> &RosterSynchronizer {
        &self.roster
    }

    pub fn buddy_presence(&self) -> &PresenceBook {
        &self.presence
    }

    pub fn rooms(&self) -> &MucManager {
        &self.muc
    }

    pub fn pending_queries(&self) -> usize {
        self.iq.pending_count()
    }

    /// The socket is up: open the stream.
    pub fn on_connected(&mut self) {
        let header = self.stream.connect();
        info!(account = %self.account(), "connected, opening stream");
        if let Err(error) = self.transport.write(header.as_bytes()) {
            self.fail(error);
        }
    }

    /// Process one read from the socket.
    pub fn on_bytes(&mut self, bytes: &[u8]) {
        if self.stream.phase() == StreamPhase::Offline {
            debug!(len = bytes.len(), "dropping bytes while offline");
            return;
        }

        let events = match self.stream.feed(bytes) {
            Ok(events) => events,
            Err(error) => {
                self.fail(error.into());
                return;
            }
        };

        for event in events {
            let flow = match event {
                ParseEvent::StreamOpened(header) => self
                    .stream
                    .on_stream_opened(header)
                    .and_then(|actions| self.apply(actions)),
                ParseEvent::Stanza(element) => self.dispatch(element),
                ParseEvent::StreamClosed => {
                    info!(account = %self.account(), "server closed the stream");
                    self.close_stream();
                    return;
                }
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Restarted) => return,
                Err(error) => {
                    self.fail(error);
                    return;
                }
            }
            if self.stream.phase() == StreamPhase::Offline {
                return;
            }
        }
    }

    /// The socket went away underneath us.
    pub fn on_disconnected(&mut self) {
        if self.stream.phase() == StreamPhase::Offline {
            return;
        }
        warn!(account = %self.account(), phase = ?self.stream.phase(), "transport lost");
        let error = ConnectionError::TransportError("connection closed by peer".to_string());
        self.emit(EventPayload::ConnectionError {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.teardown();
    }

    /// Close the stream on our side.
    pub fn disconnect(&mut self) {
        if self.stream.phase() == StreamPhase::Offline {
            return;
        }
        info!(account = %self.account(), "disconnecting");
        self.close_stream();
    }

    /// Report a terminal error and tear the connection down.
    pub(crate) fn fail(&mut self, error: ConnectionError) {
        error!(account = %self.account(), error = %error, "connection failed");
        self.emit(EventPayload::ConnectionError {
            kind: error.kind(),
            message: error.to_string(),
        });
        self.close_stream();
    }

    fn close_stream(&mut self) {
        if let Err(error) = self.transport.write(STREAM_CLOSE.as_bytes()) {
            debug!(error = %error, "could not write stream close");
        }
        if let Err(error) = self.transport.close() {
            debug!(error = %error, "could not close transport");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.iq.on_disconnect();
        natter_roster::flows::sign_off_all(self);
        natter_muc::flows::leave_all(self);
        self.stream.disconnect();
    }

    /// Carry out what the stream machine asked for.
    pub(crate) fn apply(&mut self, actions: Vec<StreamAction>) -> Result<Flow, ConnectionError> {
        for action in actions {
            match action {
                StreamAction::Send(element) => self.send(element)?,
                StreamAction::Query(element, step) => {
                    self.send_query(
                        element,
                        Box::new(move |connection: &mut Self, reply: Element| {
                            connection.on_negotiation_reply(step, reply)
                        }),
                    )?;
                }
                StreamAction::Restart(header) => {
                    debug!("restarting stream");
                    self.transport.write(header.as_bytes())?;
                    return Ok(Flow::Restarted);
                }
                StreamAction::Bound(jid) => self.on_bound(jid)?,
            }
        }
        Ok(Flow::Continue)
    }

    fn on_negotiation_reply(&mut self, step: NegotiationStep, reply: Element) {
        let result = self
            .stream
            .handle_negotiation_reply(step, &reply)
            .and_then(|actions| self.apply(actions));
        if let Err(error) = result {
            self.fail(error);
        }
    }

    fn on_bound(&mut self, jid: FullJid) -> Result<(), ConnectionError> {
        info!(jid = %jid, "session established");
        self.emit(EventPayload::ConnectionEstablished { jid: jid.to_string() });
        natter_roster::flows::request_roster(self).map_err(|error| match error {
            RosterError::Connection(error) => error,
            other => ConnectionError::StreamError(other.to_string()),
        })?;
        natter_roster::flows::announce_presence(self)
    }
}

impl<T: XmppTransport> XmppHost for Connection<T> {
    fn send(&mut self, stanza: Element) -> Result<(), ConnectionError> {
        trace!(stanza = %stanza, "sending");
        self.transport.write(&stanza.to_bytes())
    }

    fn send_query(
        &mut self,
        stanza: Element,
        continuation: Continuation<Self>,
    ) -> Result<String, ConnectionError> {
        self.iq.send_query(&mut self.transport, stanza, continuation)
    }

    fn emit(&mut self, payload: EventPayload) {
        let event = match Event::from_payload(EventSource::Xmpp, payload) {
            Ok(event) => event,
            Err(error) => {
                warn!(error = %error, "could not wrap event");
                return;
            }
        };
        if let Err(error) = self.bus.publish(event) {
            warn!(error = %error, "failed to publish event");
        }
    }
}

impl<T: XmppTransport> RosterHost for Connection<T> {
    fn roster(&mut self) -> &mut RosterSynchronizer {
        &mut self.roster
    }

    fn presence_book(&mut self) -> &mut PresenceBook {
        &mut self.presence
    }
}

impl<T: XmppTransport> MucHost for Connection<T> {
    fn muc(&mut self) -> &mut MucManager {
        &mut self.muc
    }
}

impl<T: XmppTransport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("account", self.account())
            .field("phase", &self.stream.phase())
            .field("iq", &self.iq)
            .field("rooms", &self.muc.len())
            .finish()
    }
}
