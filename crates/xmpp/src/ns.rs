//! Namespace URIs used by the engine.

pub const CLIENT: &str = "jabber:client";
pub const STREAM: &str = "http://etherx.jabber.org/streams";
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

pub const IQ_AUTH: &str = "jabber:iq:auth";
pub const IQ_AUTH_FEATURE: &str = "http://jabber.org/features/iq-auth";
pub const ROSTER: &str = "jabber:iq:roster";
pub const REGISTER: &str = "jabber:iq:register";
pub const DATA_FORMS: &str = "jabber:x:data";
pub const X_CONFERENCE: &str = "jabber:x:conference";
pub const X_DELAY: &str = "jabber:x:delay";
pub const DELAY: &str = "urn:xmpp:delay";
pub const PING: &str = "urn:xmpp:ping";
pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";

pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";

pub const MUC: &str = "http://jabber.org/protocol/muc";
pub const MUC_USER: &str = "http://jabber.org/protocol/muc#user";
pub const MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";
pub const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";
