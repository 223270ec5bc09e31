use crate::element::Element;
use crate::ns;

/// The closed set of top-level elements the dispatcher understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    Iq(Element),
    Message(Element),
    Presence(Element),
    Features(Element),
    StreamError(Element),
    Challenge(Element),
    Success(Element),
    Failure(Element),
    Proceed(Element),
    /// Anything else, kept for forward compatibility.
    Unknown(Element),
}

impl Stanza {
    pub fn classify(element: Element) -> Self {
        let ns = element.ns().unwrap_or_default();
        match (element.name(), ns) {
            ("iq", ns::CLIENT) => Stanza::Iq(element),
            ("message", ns::CLIENT) => Stanza::Message(element),
            ("presence", ns::CLIENT) => Stanza::Presence(element),
            ("features", ns::STREAM) => Stanza::Features(element),
            ("error", ns::STREAM) => Stanza::StreamError(element),
            ("challenge", ns::SASL) => Stanza::Challenge(element),
            ("success", ns::SASL) => Stanza::Success(element),
            ("failure", ns::SASL) => Stanza::Failure(element),
            ("proceed", ns::TLS) => Stanza::Proceed(element),
            _ => Stanza::Unknown(element),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Iq(_) => "iq",
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Features(_) => "stream:features",
            Stanza::StreamError(_) => "stream:error",
            Stanza::Challenge(_) => "challenge",
            Stanza::Success(_) => "success",
            Stanza::Failure(_) => "failure",
            Stanza::Proceed(_) => "proceed",
            Stanza::Unknown(_) => "unknown",
        }
    }

    pub fn element(&self) -> &Element {
        match self {
            Stanza::Iq(e)
            | Stanza::Message(e)
            | Stanza::Presence(e)
            | Stanza::Features(e)
            | Stanza::StreamError(e)
            | Stanza::Challenge(e)
            | Stanza::Success(e)
            | Stanza::Failure(e)
            | Stanza::Proceed(e)
            | Stanza::Unknown(e) => e,
        }
    }

    /// True for the elements exchanged only while negotiating the stream.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            Stanza::Features(_)
                | Stanza::StreamError(_)
                | Stanza::Challenge(_)
                | Stanza::Success(_)
                | Stanza::Failure(_)
                | Stanza::Proceed(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn of(iq: &Element) -> Option<Self> {
        match iq.attr("type")? {
            "get" => Some(IqType::Get),
            "set" => Some(IqType::Set),
            "result" => Some(IqType::Result),
            "error" => Some(IqType::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, IqType::Result | IqType::Error)
    }
}

pub fn iq(kind: IqType) -> Element {
    Element::new("iq", ns::CLIENT).with_attr("type", kind.as_str())
}

/// An empty `result` answering `request`.
pub fn iq_result(request: &Element) -> Element {
    iq(IqType::Result)
        .with_opt_attr("to", request.attr("from"))
        .with_opt_attr("id", request.attr("id"))
}

/// An `error` reply carrying a defined stanza error condition.
pub fn iq_error(request: &Element, error_type: &str, condition: &str) -> Element {
    iq(IqType::Error)
        .with_opt_attr("to", request.attr("from"))
        .with_opt_attr("id", request.attr("id"))
        .with_child(
            Element::new("error", ns::CLIENT)
                .with_attr("type", error_type)
                .with_child(Element::new(condition, ns::STANZAS)),
        )
}

/// Human readable description of a stanza `<error/>` child, e.g.
/// `"item-not-found (404): Room does not exist"`.
pub fn error_description(stanza: &Element) -> String {
    let Some(error) = stanza.get_child("error", ns::CLIENT) else {
        return "unknown error".to_string();
    };

    let condition = error
        .children()
        .find(|child| child.ns() == Some(ns::STANZAS) && child.name() != "text")
        .map(|child| child.name().to_string());
    let text = error
        .get_child("text", ns::STANZAS)
        .map(Element::text)
        .filter(|text| !text.is_empty())
        .or_else(|| Some(error.text()).filter(|text| !text.trim().is_empty()));
    let code = error.attr("code");

    let mut description = condition.unwrap_or_else(|| "unknown error".to_string());
    if let Some(code) = code {
        description.push_str(&format!(" ({code})"));
    }
    if let Some(text) = text {
        description.push_str(": ");
        description.push_str(text.trim());
    }
    description
}
