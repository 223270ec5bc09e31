use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sasl::client::Mechanism;
use sasl::client::mechanisms::{Plain, Scram};
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{ChannelBinding, Credentials};
use sha1::{Digest, Sha1 as Sha1Hasher};
use tracing::debug;

use crate::element::Element;
use crate::error::ConnectionError;
use crate::ns;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedMechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl SelectedMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedMechanism::ScramSha256 => "SCRAM-SHA-256",
            SelectedMechanism::ScramSha1 => "SCRAM-SHA-1",
            SelectedMechanism::Plain => "PLAIN",
        }
    }
}

impl std::fmt::Display for SelectedMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const MECHANISM_PREFERENCE: &[SelectedMechanism] = &[
    SelectedMechanism::ScramSha256,
    SelectedMechanism::ScramSha1,
    SelectedMechanism::Plain,
];

pub fn select_mechanism<S: AsRef<str>>(server_mechanisms: &[S]) -> Option<SelectedMechanism> {
    MECHANISM_PREFERENCE
        .iter()
        .find(|m| server_mechanisms.iter().any(|offered| offered.as_ref() == m.name()))
        .copied()
}

/// Mechanism names listed in a `<mechanisms/>` feature.
pub fn offered_mechanisms(features: &Element) -> Vec<String> {
    features
        .get_child("mechanisms", ns::SASL)
        .map(|mechanisms| {
            mechanisms
                .children_named("mechanism", ns::SASL)
                .map(|m| m.text().trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn build_mechanism(
    selected: SelectedMechanism,
    credentials: &Credentials,
) -> Result<Box<dyn Mechanism + Send>, ConnectionError> {
    match selected {
        SelectedMechanism::ScramSha256 => Scram::<Sha256>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-256: {e:?}"
                ))
            }),
        SelectedMechanism::ScramSha1 => Scram::<Sha1>::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "failed to initialize SCRAM-SHA-1: {e:?}"
                ))
            }),
        SelectedMechanism::Plain => Plain::from_credentials(credentials.clone())
            .map(|m| Box::new(m) as Box<dyn Mechanism + Send>)
            .map_err(|e| {
                ConnectionError::AuthenticationFailed(format!("failed to initialize PLAIN: {e:?}"))
            }),
    }
}

/// Base64 payload of a SASL element. An empty payload is written as `=`.
pub fn encode_payload(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_string()
    } else {
        STANDARD.encode(data)
    }
}

pub fn decode_payload(element: &Element) -> Result<Vec<u8>, ConnectionError> {
    let text = element.text();
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    STANDARD.decode(text).map_err(|e| {
        ConnectionError::AuthenticationFailed(format!("invalid base64 in <{}/>: {e}", element.name()))
    })
}

/// One SASL exchange in progress.
pub struct SaslNegotiation {
    selected: SelectedMechanism,
    mechanism: Box<dyn Mechanism + Send>,
}

impl std::fmt::Debug for SaslNegotiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslNegotiation")
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl SaslNegotiation {
    /// Pick the best offered mechanism and build the opening `<auth/>`.
    pub fn start<S: AsRef<str>>(
        offered: &[S],
        username: &str,
        password: &str,
    ) -> Result<(Self, Element), ConnectionError> {
        let selected = select_mechanism(offered).ok_or_else(|| {
            ConnectionError::AuthenticationFailed(format!(
                "no supported SASL mechanism found; server offers: {}",
                offered
                    .iter()
                    .map(AsRef::as_ref)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

        debug!(mechanism = %selected, "selected SASL mechanism");

        let credentials = Credentials::default()
            .with_username(username)
            .with_password(password)
            .with_channel_binding(ChannelBinding::Unsupported);

        let mut mechanism = build_mechanism(selected, &credentials)?;
        let initial = mechanism.initial();

        let auth = Element::new("auth", ns::SASL)
            .with_attr("mechanism", selected.name())
            .with_text(encode_payload(&initial));

        Ok((Self { selected, mechanism }, auth))
    }

    pub fn selected(&self) -> SelectedMechanism {
        self.selected
    }

    /// Answer a `<challenge/>` with a `<response/>`.
    pub fn respond(&mut self, challenge: &Element) -> Result<Element, ConnectionError> {
        let data = decode_payload(challenge)?;
        let response = self.mechanism.response(&data).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("SASL challenge-response failed: {e:?}"))
        })?;
        Ok(Element::new("response", ns::SASL).with_text(encode_payload(&response)))
    }

    /// Verify the additional data carried by `<success/>`.
    pub fn complete(&mut self, success: &Element) -> Result<(), ConnectionError> {
        let data = decode_payload(success)?;
        self.mechanism.success(&data).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "server signature verification failed: {e:?}"
            ))
        })
    }
}

pub fn map_failure(failure: &Element) -> ConnectionError {
    let condition = failure
        .children()
        .find(|child| child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "not-authorized".to_string());
    let text = failure.child_text("text", ns::SASL).unwrap_or_default();

    if text.is_empty() {
        ConnectionError::AuthenticationFailed(condition)
    } else {
        ConnectionError::AuthenticationFailed(format!("{condition}: {text}"))
    }
}

/// `hex(sha1(stream_id + password))` for legacy `jabber:iq:auth` digests.
pub fn legacy_digest(stream_id: &str, password: &str) -> String {
    let mut hasher = Sha1Hasher::new();
    hasher.update(stream_id.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
