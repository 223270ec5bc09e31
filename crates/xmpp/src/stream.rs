//! Connection lifecycle: stream framing, authentication and resource binding.
//!
//! The machine owns the [`StanzaTreeBuilder`] and decides what to write in
//! response to each negotiation element. It never touches the transport;
//! every side effect comes back as a [`StreamAction`] for the connection to
//! carry out. Negotiation iqs go through the correlator like any other
//! query and come back through [`StreamMachine::handle_negotiation_reply`].

use jid::{BareJid, FullJid};
use tracing::{debug, info, warn};

use crate::element::Element;
use crate::error::{ConnectionError, ParseError};
use crate::ns;
use crate::parser::{ParseEvent, StanzaTreeBuilder, StreamHeader};
use crate::sasl::{self, SaslNegotiation, SelectedMechanism};
use crate::stanza::{IqType, Stanza, error_description, iq};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Offline,
    Negotiating,
    Authenticating,
    Reinitializing,
    Bound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    Sasl(SelectedMechanism),
    LegacyDigest,
    LegacyPlaintext,
}

/// Negotiation query a reply belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    LegacyFields,
    LegacyAuth,
    Bind,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    Send(Element),
    /// Send through the correlator and feed the reply back with `step`.
    Query(Element, NegotiationStep),
    /// The builder was reset; write this header and ignore the remainder of
    /// the current read.
    Restart(String),
    Bound(FullJid),
}

#[derive(Debug, Clone)]
pub struct StreamCredentials {
    pub jid: BareJid,
    pub password: String,
    pub resource: String,
    pub allow_plaintext_auth: bool,
}

/// Opening stream header for `domain`.
pub fn stream_header(domain: &str) -> String {
    format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{}' xmlns:stream='{}' version='1.0'>",
        quick_xml::escape::escape(domain),
        ns::CLIENT,
        ns::STREAM
    )
}

pub const STREAM_CLOSE: &str = "</stream:stream>";

#[derive(Debug)]
pub struct StreamMachine {
    credentials: StreamCredentials,
    builder: StanzaTreeBuilder,
    phase: StreamPhase,
    mechanism: Option<AuthMechanism>,
    version: Option<String>,
    stream_id: Option<String>,
    sasl: Option<SaslNegotiation>,
    auth_started: bool,
    authenticated: bool,
    bind_requested: bool,
    session_required: bool,
    bound_jid: Option<FullJid>,
}

impl StreamMachine {
    pub fn new(credentials: StreamCredentials) -> Self {
        Self {
            credentials,
            builder: StanzaTreeBuilder::new(),
            phase: StreamPhase::Offline,
            mechanism: None,
            version: None,
            stream_id: None,
            sasl: None,
            auth_started: false,
            authenticated: false,
            bind_requested: false,
            session_required: false,
            bound_jid: None,
        }
    }

    /// Cap the bytes one unfinished inbound stanza may hold.
    pub fn with_max_stanza_size(mut self, max_stanza_size: usize) -> Self {
        self.builder = StanzaTreeBuilder::with_max_stanza_size(max_stanza_size);
        self
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn mechanism(&self) -> Option<AuthMechanism> {
        self.mechanism
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn bound_jid(&self) -> Option<&FullJid> {
        self.bound_jid.as_ref()
    }

    pub fn account(&self) -> &BareJid {
        &self.credentials.jid
    }

    pub fn is_bound(&self) -> bool {
        self.phase == StreamPhase::Bound
    }

    /// Socket is up: start a fresh stream and return the header to write.
    pub fn connect(&mut self) -> String {
        self.clear();
        self.phase = StreamPhase::Negotiating;
        debug!(account = %self.credentials.jid, "opening stream");
        stream_header(self.credentials.jid.domain().as_str())
    }

    /// Run inbound bytes through the builder.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ParseEvent>, ParseError> {
        self.builder.feed(bytes)
    }

    /// Transport is gone; forget everything tied to the old stream.
    pub fn disconnect(&mut self) {
        if self.phase != StreamPhase::Offline {
            info!(account = %self.credentials.jid, phase = ?self.phase, "stream offline");
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.builder.reset();
        self.phase = StreamPhase::Offline;
        self.mechanism = None;
        self.version = None;
        self.stream_id = None;
        self.sasl = None;
        self.auth_started = false;
        self.authenticated = false;
        self.bind_requested = false;
        self.session_required = false;
        self.bound_jid = None;
    }

    pub fn on_stream_opened(
        &mut self,
        header: StreamHeader,
    ) -> Result<Vec<StreamAction>, ConnectionError> {
        match self.phase {
            StreamPhase::Offline => {
                debug!("ignoring stream header while offline");
                return Ok(Vec::new());
            }
            StreamPhase::Reinitializing => {
                self.stream_id = header.id.clone();
                self.phase = StreamPhase::Negotiating;
                return Ok(Vec::new());
            }
            StreamPhase::Negotiating if !self.authenticated => {}
            _ => return Err(self.unexpected("stream header")),
        }

        debug!(id = ?header.id, version = ?header.version, "server opened stream");
        let legacy = !header.supports_features();
        self.version = Some(header.version.clone().unwrap_or_else(|| "0.9".to_string()));
        self.stream_id = header.id;
        self.phase = StreamPhase::Authenticating;

        if legacy {
            return Ok(vec![self.request_legacy_fields()]);
        }
        Ok(Vec::new())
    }

    /// Handle one negotiation element (features, SASL, stream error).
    pub fn on_negotiation(&mut self, stanza: Stanza) -> Result<Vec<StreamAction>, ConnectionError> {
        if self.phase == StreamPhase::Offline {
            debug!(stanza = stanza.name(), "ignoring negotiation element while offline");
            return Ok(Vec::new());
        }

        match stanza {
            Stanza::Features(features) => self.on_features(&features),
            Stanza::Challenge(challenge) => match self.sasl.as_mut() {
                Some(sasl) => Ok(vec![StreamAction::Send(sasl.respond(&challenge)?)]),
                None => Err(self.unexpected("SASL challenge")),
            },
            Stanza::Success(success) => {
                let Some(mut sasl) = self.sasl.take() else {
                    return Err(self.unexpected("SASL success"));
                };
                sasl.complete(&success)?;
                info!(account = %self.credentials.jid, mechanism = %sasl.selected(), "SASL authentication succeeded");

                self.authenticated = true;
                self.builder.reset();
                self.phase = StreamPhase::Reinitializing;
                Ok(vec![StreamAction::Restart(stream_header(
                    self.credentials.jid.domain().as_str(),
                ))])
            }
            Stanza::Failure(failure) => {
                if self.sasl.is_none() {
                    return Err(self.unexpected("SASL failure"));
                }
                let error = sasl::map_failure(&failure);
                warn!(error = %error, "SASL authentication failed");
                Err(error)
            }
            Stanza::StreamError(error) => Err(stream_error(&error)),
            Stanza::Proceed(_) => Err(ConnectionError::StreamError(
                "unexpected STARTTLS proceed".to_string(),
            )),
            other => {
                debug!(stanza = other.name(), "not a negotiation element");
                Ok(Vec::new())
            }
        }
    }

    fn on_features(&mut self, features: &Element) -> Result<Vec<StreamAction>, ConnectionError> {
        if self.authenticated {
            if self.phase != StreamPhase::Negotiating || self.bind_requested {
                return Err(self.unexpected("stream features"));
            }
            return self.on_post_auth_features(features);
        }
        if self.phase != StreamPhase::Authenticating {
            return Err(self.unexpected("stream features"));
        }
        if self.auth_started {
            debug!("ignoring repeated stream features during authentication");
            return Ok(Vec::new());
        }

        let offered = sasl::offered_mechanisms(features);
        if offered.is_empty() {
            if features.has_child("auth", ns::IQ_AUTH_FEATURE) {
                return Ok(vec![self.request_legacy_fields()]);
            }
            let tls_required = features
                .get_child("starttls", ns::TLS)
                .is_some_and(|tls| tls.has_child("required", ns::TLS));
            if tls_required {
                return Err(ConnectionError::StreamError(
                    "server requires STARTTLS, which must be negotiated by the transport"
                        .to_string(),
                ));
            }
            return Err(ConnectionError::AuthenticationFailed(
                "server did not advertise any SASL mechanisms".to_string(),
            ));
        }

        debug!(mechanisms = ?offered, "server advertised SASL mechanisms");
        let (negotiation, auth) = SaslNegotiation::start(
            &offered,
            self.credentials.jid.node().map(|node| node.as_str()).unwrap_or_default(),
            &self.credentials.password,
        )?;
        self.mechanism = Some(AuthMechanism::Sasl(negotiation.selected()));
        self.sasl = Some(negotiation);
        self.auth_started = true;
        self.phase = StreamPhase::Authenticating;
        Ok(vec![StreamAction::Send(auth)])
    }

    fn on_post_auth_features(
        &mut self,
        features: &Element,
    ) -> Result<Vec<StreamAction>, ConnectionError> {
        if !features.has_child("bind", ns::BIND) {
            return Err(ConnectionError::StreamError(
                "server did not offer resource binding".to_string(),
            ));
        }
        self.session_required = features
            .get_child("session", ns::SESSION)
            .is_some_and(|session| !session.has_child("optional", ns::SESSION));

        self.bind_requested = true;
        let bind = iq(IqType::Set).with_child(
            Element::new("bind", ns::BIND).with_child(
                Element::new("resource", ns::BIND).with_text(self.credentials.resource.as_str()),
            ),
        );
        Ok(vec![StreamAction::Query(bind, NegotiationStep::Bind)])
    }

    fn request_legacy_fields(&mut self) -> StreamAction {
        self.phase = StreamPhase::Authenticating;
        self.auth_started = true;
        let query = iq(IqType::Get)
            .with_attr("to", self.credentials.jid.domain().as_str())
            .with_child(Element::new("query", ns::IQ_AUTH).with_child(
                Element::new("username", ns::IQ_AUTH).with_text(self.username()),
            ));
        StreamAction::Query(query, NegotiationStep::LegacyFields)
    }

    fn unexpected(&self, element: &str) -> ConnectionError {
        warn!(element, phase = ?self.phase, "negotiation element out of order");
        ConnectionError::UnexpectedNegotiation {
            element: element.to_string(),
            phase: format!("{:?}", self.phase).to_lowercase(),
        }
    }

    fn username(&self) -> String {
        self.credentials
            .jid
            .node()
            .map(|node| node.to_string())
            .unwrap_or_default()
    }

    /// Continue negotiation with the reply to a query issued as `step`.
    pub fn handle_negotiation_reply(
        &mut self,
        step: NegotiationStep,
        reply: &Element,
    ) -> Result<Vec<StreamAction>, ConnectionError> {
        if self.phase == StreamPhase::Offline {
            return Ok(Vec::new());
        }
        let failed = IqType::of(reply) == Some(IqType::Error);

        match step {
            NegotiationStep::LegacyFields => {
                if failed {
                    return Err(ConnectionError::AuthenticationFailed(format!(
                        "legacy authentication unavailable: {}",
                        error_description(reply)
                    )));
                }
                self.legacy_auth(reply).map(|action| vec![action])
            }
            NegotiationStep::LegacyAuth => {
                if failed {
                    return Err(ConnectionError::AuthenticationFailed(error_description(reply)));
                }
                let jid = self.full_jid(None)?;
                Ok(vec![self.finish(jid)])
            }
            NegotiationStep::Bind => {
                if failed {
                    return Err(ConnectionError::StreamError(format!(
                        "resource binding failed: {}",
                        error_description(reply)
                    )));
                }
                let assigned = reply
                    .get_child("bind", ns::BIND)
                    .and_then(|bind| bind.child_text("jid", ns::BIND));
                let jid = self.full_jid(assigned.as_deref())?;

                if self.session_required {
                    self.bound_jid = Some(jid);
                    let session = iq(IqType::Set).with_child(Element::new("session", ns::SESSION));
                    return Ok(vec![StreamAction::Query(session, NegotiationStep::Session)]);
                }
                Ok(vec![self.finish(jid)])
            }
            NegotiationStep::Session => {
                if failed {
                    return Err(ConnectionError::StreamError(format!(
                        "session establishment failed: {}",
                        error_description(reply)
                    )));
                }
                let jid = match self.bound_jid.take() {
                    Some(jid) => jid,
                    None => self.full_jid(None)?,
                };
                Ok(vec![self.finish(jid)])
            }
        }
    }

    fn legacy_auth(&mut self, fields: &Element) -> Result<StreamAction, ConnectionError> {
        let offered = fields.get_child("query", ns::IQ_AUTH);
        let offers = |name: &str| offered.is_some_and(|query| query.has_child(name, ns::IQ_AUTH));

        let mut query = Element::new("query", ns::IQ_AUTH)
            .with_child(Element::new("username", ns::IQ_AUTH).with_text(self.username()))
            .with_child(
                Element::new("resource", ns::IQ_AUTH).with_text(self.credentials.resource.as_str()),
            );

        if offers("digest") {
            let digest = sasl::legacy_digest(
                self.stream_id.as_deref().unwrap_or_default(),
                &self.credentials.password,
            );
            query.push_child(Element::new("digest", ns::IQ_AUTH).with_text(digest));
            self.mechanism = Some(AuthMechanism::LegacyDigest);
        } else if offers("password") && self.credentials.allow_plaintext_auth {
            query.push_child(
                Element::new("password", ns::IQ_AUTH).with_text(self.credentials.password.as_str()),
            );
            self.mechanism = Some(AuthMechanism::LegacyPlaintext);
        } else if offers("password") {
            return Err(ConnectionError::AuthenticationFailed(
                "server requires a plaintext password and allow_plaintext_auth is off".to_string(),
            ));
        } else {
            return Err(ConnectionError::AuthenticationFailed(
                "server offered no usable legacy authentication method".to_string(),
            ));
        }

        debug!(mechanism = ?self.mechanism, "sending legacy authentication");
        Ok(StreamAction::Query(
            iq(IqType::Set)
                .with_attr("to", self.credentials.jid.domain().as_str())
                .with_child(query),
            NegotiationStep::LegacyAuth,
        ))
    }

    fn full_jid(&self, assigned: Option<&str>) -> Result<FullJid, ConnectionError> {
        if let Some(assigned) = assigned {
            return FullJid::new(assigned.trim()).map_err(|e| {
                ConnectionError::StreamError(format!("server assigned invalid address {assigned}: {e}"))
            });
        }
        FullJid::new(&format!("{}/{}", self.credentials.jid, self.credentials.resource)).map_err(
            |e| ConnectionError::StreamError(format!("invalid resource {}: {e}", self.credentials.resource)),
        )
    }

    fn finish(&mut self, jid: FullJid) -> StreamAction {
        info!(jid = %jid, mechanism = ?self.mechanism, "stream bound");
        self.phase = StreamPhase::Bound;
        self.bound_jid = Some(jid.clone());
        StreamAction::Bound(jid)
    }
}

fn stream_error(error: &Element) -> ConnectionError {
    let condition = error
        .children()
        .find(|child| child.ns() == Some(ns::STREAMS) && child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    match error.child_text("text", ns::STREAMS) {
        Some(text) if !text.is_empty() => {
            ConnectionError::StreamError(format!("{condition}: {text}"))
        }
        _ => ConnectionError::StreamError(condition),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use natter_core::event::ConnectionErrorKind;

    use super::*;

    fn credentials() -> StreamCredentials {
        StreamCredentials {
            jid: BareJid::new("user@home.realm").unwrap(),
            password: "secret".to_string(),
            resource: "natter".to_string(),
            allow_plaintext_auth: false,
        }
    }

    fn header(version: Option<&str>) -> StreamHeader {
        StreamHeader {
            id: Some("s1".to_string()),
            version: version.map(str::to_string),
            ..StreamHeader::default()
        }
    }

    fn features_with(child: Element) -> Stanza {
        Stanza::Features(Element::new("features", ns::STREAM).with_child(child))
    }

    fn plain_features() -> Stanza {
        features_with(
            Element::new("mechanisms", ns::SASL)
                .with_child(Element::new("mechanism", ns::SASL).with_text("PLAIN")),
        )
    }

    fn result_for(element: &Element) -> Element {
        iq(IqType::Result).with_opt_attr("id", element.attr("id"))
    }

    #[test]
    fn header_names_the_account_domain() {
        let mut machine = StreamMachine::new(credentials());
        let header = machine.connect();
        assert_eq!(machine.phase(), StreamPhase::Negotiating);
        assert!(header.contains("to='home.realm'"));
        assert!(header.contains("version='1.0'"));
        assert!(header.ends_with('>') && !header.ends_with("/>"));
    }

    #[test]
    fn sasl_plain_then_bind_reaches_bound() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        assert!(machine.on_stream_opened(header(Some("1.0"))).unwrap().is_empty());
        assert_eq!(machine.phase(), StreamPhase::Authenticating);

        let actions = machine.on_negotiation(plain_features()).unwrap();
        let [StreamAction::Send(auth)] = actions.as_slice() else {
            panic!("expected auth, got {actions:?}");
        };
        assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
        assert_eq!(
            machine.mechanism(),
            Some(AuthMechanism::Sasl(SelectedMechanism::Plain))
        );

        let actions = machine
            .on_negotiation(Stanza::Success(Element::new("success", ns::SASL)))
            .unwrap();
        assert_matches!(actions.as_slice(), [StreamAction::Restart(header)] if header.contains("stream:stream"));
        assert_eq!(machine.phase(), StreamPhase::Reinitializing);

        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        assert_eq!(machine.phase(), StreamPhase::Negotiating);

        let actions = machine
            .on_negotiation(features_with(Element::new("bind", ns::BIND)))
            .unwrap();
        let [StreamAction::Query(bind, NegotiationStep::Bind)] = actions.as_slice() else {
            panic!("expected bind query, got {actions:?}");
        };
        assert!(bind.to_string().contains("<resource>natter</resource>"));

        let reply = result_for(bind).with_child(
            Element::new("bind", ns::BIND)
                .with_child(Element::new("jid", ns::BIND).with_text("user@home.realm/natter-42")),
        );
        let actions = machine
            .handle_negotiation_reply(NegotiationStep::Bind, &reply)
            .unwrap();
        let [StreamAction::Bound(jid)] = actions.as_slice() else {
            panic!("expected bound, got {actions:?}");
        };
        assert_eq!(jid.to_string(), "user@home.realm/natter-42");
        assert!(machine.is_bound());
    }

    #[test]
    fn required_session_is_established_before_bound() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine.on_negotiation(plain_features()).unwrap();
        machine
            .on_negotiation(Stanza::Success(Element::new("success", ns::SASL)))
            .unwrap();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();

        let features = Stanza::Features(
            Element::new("features", ns::STREAM)
                .with_child(Element::new("bind", ns::BIND))
                .with_child(Element::new("session", ns::SESSION)),
        );
        machine.on_negotiation(features).unwrap();

        let actions = machine
            .handle_negotiation_reply(NegotiationStep::Bind, &iq(IqType::Result))
            .unwrap();
        assert_matches!(actions.as_slice(), [StreamAction::Query(_, NegotiationStep::Session)]);
        assert!(!machine.is_bound());

        let actions = machine
            .handle_negotiation_reply(NegotiationStep::Session, &iq(IqType::Result))
            .unwrap();
        assert_matches!(actions.as_slice(), [StreamAction::Bound(jid)] if jid.to_string() == "user@home.realm/natter");
    }

    #[test]
    fn legacy_server_gets_digest_auth() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        let actions = machine.on_stream_opened(header(None)).unwrap();
        assert_eq!(machine.phase(), StreamPhase::Authenticating);
        let [StreamAction::Query(query, NegotiationStep::LegacyFields)] = actions.as_slice() else {
            panic!("expected field query, got {actions:?}");
        };
        assert_eq!(query.attr("type"), Some("get"));

        let fields = iq(IqType::Result).with_child(
            Element::new("query", ns::IQ_AUTH)
                .with_child(Element::new("username", ns::IQ_AUTH))
                .with_child(Element::new("password", ns::IQ_AUTH))
                .with_child(Element::new("digest", ns::IQ_AUTH))
                .with_child(Element::new("resource", ns::IQ_AUTH)),
        );
        let actions = machine
            .handle_negotiation_reply(NegotiationStep::LegacyFields, &fields)
            .unwrap();
        let [StreamAction::Query(auth, NegotiationStep::LegacyAuth)] = actions.as_slice() else {
            panic!("expected auth query, got {actions:?}");
        };
        let query = auth.get_child("query", ns::IQ_AUTH).unwrap();
        assert_eq!(
            query.child_text("digest", ns::IQ_AUTH),
            Some(sasl::legacy_digest("s1", "secret"))
        );
        assert!(!query.has_child("password", ns::IQ_AUTH));
        assert_eq!(machine.mechanism(), Some(AuthMechanism::LegacyDigest));

        let actions = machine
            .handle_negotiation_reply(NegotiationStep::LegacyAuth, &iq(IqType::Result))
            .unwrap();
        assert_matches!(actions.as_slice(), [StreamAction::Bound(_)]);
        assert!(machine.is_bound());
    }

    #[test]
    fn plaintext_legacy_auth_requires_opt_in() {
        let fields = iq(IqType::Result).with_child(
            Element::new("query", ns::IQ_AUTH).with_child(Element::new("password", ns::IQ_AUTH)),
        );

        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(None)).unwrap();
        let error = machine
            .handle_negotiation_reply(NegotiationStep::LegacyFields, &fields)
            .unwrap_err();
        assert_matches!(error, ConnectionError::AuthenticationFailed(_));

        let mut machine = StreamMachine::new(StreamCredentials {
            allow_plaintext_auth: true,
            ..credentials()
        });
        machine.connect();
        machine.on_stream_opened(header(None)).unwrap();
        let actions = machine
            .handle_negotiation_reply(NegotiationStep::LegacyFields, &fields)
            .unwrap();
        let [StreamAction::Query(auth, _)] = actions.as_slice() else {
            panic!("expected auth query");
        };
        assert!(auth.to_string().contains("<password>secret</password>"));
        assert_eq!(machine.mechanism(), Some(AuthMechanism::LegacyPlaintext));
    }

    #[test]
    fn sasl_failure_is_fatal_authentication_error() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine.on_negotiation(plain_features()).unwrap();

        let failure = Element::new("failure", ns::SASL)
            .with_child(Element::new("not-authorized", ns::SASL));
        let error = machine.on_negotiation(Stanza::Failure(failure)).unwrap_err();
        assert_matches!(error, ConnectionError::AuthenticationFailed(ref message) if message == "not-authorized");
        assert!(!error.is_retryable());
    }

    #[test]
    fn stream_error_names_condition() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        let error = Element::new("error", ns::STREAM)
            .with_child(Element::new("conflict", ns::STREAMS))
            .with_child(Element::new("text", ns::STREAMS).with_text("replaced"));
        let error = machine.on_negotiation(Stanza::StreamError(error)).unwrap_err();
        assert_eq!(error.to_string(), "stream error: conflict: replaced");
    }

    #[test]
    fn required_starttls_without_mechanisms_is_fatal() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        let features = features_with(
            Element::new("starttls", ns::TLS).with_child(Element::new("required", ns::TLS)),
        );
        assert_matches!(
            machine.on_negotiation(features),
            Err(ConnectionError::StreamError(_))
        );
    }

    #[test]
    fn offline_machine_ignores_negotiation() {
        let mut machine = StreamMachine::new(credentials());
        assert!(machine.on_negotiation(plain_features()).unwrap().is_empty());
        assert!(machine.on_stream_opened(header(Some("1.0"))).unwrap().is_empty());
        assert_eq!(machine.phase(), StreamPhase::Offline);
    }

    fn bound_machine() -> StreamMachine {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine.on_negotiation(plain_features()).unwrap();
        machine
            .on_negotiation(Stanza::Success(Element::new("success", ns::SASL)))
            .unwrap();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine
            .on_negotiation(features_with(Element::new("bind", ns::BIND)))
            .unwrap();
        machine
            .handle_negotiation_reply(NegotiationStep::Bind, &iq(IqType::Result))
            .unwrap();
        assert!(machine.is_bound());
        machine
    }

    #[test]
    fn bound_stream_refuses_a_second_header() {
        for version in [Some("1.0"), None] {
            let mut machine = bound_machine();
            let error = machine.on_stream_opened(header(version)).unwrap_err();
            assert_matches!(error, ConnectionError::UnexpectedNegotiation { ref phase, .. } if phase == "bound");
            assert_eq!(error.kind(), ConnectionErrorKind::Protocol);
            assert!(machine.is_bound());
        }
    }

    #[test]
    fn bound_stream_refuses_features_and_sasl_elements() {
        let mut machine = bound_machine();
        assert_matches!(
            machine.on_negotiation(features_with(Element::new("bind", ns::BIND))),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert_matches!(
            machine.on_negotiation(plain_features()),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert_matches!(
            machine.on_negotiation(Stanza::Success(Element::new("success", ns::SASL))),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert_matches!(
            machine.on_negotiation(Stanza::Challenge(Element::new("challenge", ns::SASL))),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert_matches!(
            machine.on_negotiation(Stanza::Failure(Element::new("failure", ns::SASL))),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert!(machine.is_bound());
    }

    #[test]
    fn repeated_header_during_authentication_is_refused() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        assert_matches!(
            machine.on_stream_opened(header(None)),
            Err(ConnectionError::UnexpectedNegotiation { ref element, ref phase })
                if element == "stream header" && phase == "authenticating"
        );
    }

    #[test]
    fn features_before_the_header_are_refused() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        assert_matches!(
            machine.on_negotiation(plain_features()),
            Err(ConnectionError::UnexpectedNegotiation { ref phase, .. }) if phase == "negotiating"
        );
    }

    #[test]
    fn second_bind_offer_while_binding_is_refused() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine.on_negotiation(plain_features()).unwrap();
        machine
            .on_negotiation(Stanza::Success(Element::new("success", ns::SASL)))
            .unwrap();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        machine
            .on_negotiation(features_with(Element::new("bind", ns::BIND)))
            .unwrap();

        assert_matches!(
            machine.on_negotiation(features_with(Element::new("bind", ns::BIND))),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
    }

    #[test]
    fn legacy_bound_stream_refuses_sasl_features() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(None)).unwrap();
        let fields = iq(IqType::Result).with_child(
            Element::new("query", ns::IQ_AUTH).with_child(Element::new("digest", ns::IQ_AUTH)),
        );
        machine
            .handle_negotiation_reply(NegotiationStep::LegacyFields, &fields)
            .unwrap();
        machine
            .handle_negotiation_reply(NegotiationStep::LegacyAuth, &iq(IqType::Result))
            .unwrap();
        assert!(machine.is_bound());

        assert_matches!(
            machine.on_negotiation(plain_features()),
            Err(ConnectionError::UnexpectedNegotiation { .. })
        );
        assert_eq!(machine.mechanism(), Some(AuthMechanism::LegacyDigest));
    }

    #[test]
    fn scram_challenge_gets_a_response() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.on_stream_opened(header(Some("1.0"))).unwrap();
        let actions = machine
            .on_negotiation(features_with(
                Element::new("mechanisms", ns::SASL)
                    .with_child(Element::new("mechanism", ns::SASL).with_text("SCRAM-SHA-1")),
            ))
            .unwrap();
        let [StreamAction::Send(auth)] = actions.as_slice() else {
            panic!("expected auth");
        };
        let first = String::from_utf8(STANDARD.decode(auth.text()).unwrap()).unwrap();
        let nonce = first.rsplit("r=").next().unwrap().to_string();

        let server_first = format!("r={nonce}srv,s=QSXCR+Q6sek8bf92,i=4096");
        let challenge =
            Element::new("challenge", ns::SASL).with_text(STANDARD.encode(server_first));
        let actions = machine.on_negotiation(Stanza::Challenge(challenge)).unwrap();
        let [StreamAction::Send(response)] = actions.as_slice() else {
            panic!("expected response");
        };
        assert_eq!(response.name(), "response");
        let client_final = String::from_utf8(STANDARD.decode(response.text()).unwrap()).unwrap();
        assert!(client_final.contains(&format!("r={nonce}srv")));
        assert!(client_final.contains(",p="));
    }

    #[test]
    fn disconnect_returns_to_offline_and_resets_the_builder() {
        let mut machine = StreamMachine::new(credentials());
        machine.connect();
        machine.feed(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' version='1.0'><iq").unwrap();
        machine.disconnect();
        assert_eq!(machine.phase(), StreamPhase::Offline);
        assert_eq!(machine.stream_id(), None);
        let events = machine.feed(b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams'>").unwrap();
        assert_matches!(events.as_slice(), [ParseEvent::StreamOpened(_)]);
    }
}
