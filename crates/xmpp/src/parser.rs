//! Incremental stanza tree builder.
//!
//! XMPP runs one long-lived XML document per stream, so bytes are buffered
//! until a construct is complete and only committed once quick-xml has
//! produced a whole event for it. Open elements live in an arena addressed
//! by index; a finished top-level element is moved out of the arena in one
//! piece and the arena is cleared for the next stanza.

use quick_xml::Reader;
use quick_xml::errors::{Error as XmlError, SyntaxError};
use quick_xml::events::{BytesStart, Event};

use crate::element::{Attribute, Element, Node};
use crate::error::ParseError;
use crate::ns;

/// Attributes of the server's `<stream:stream>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    pub to: Option<String>,
    pub from: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
    pub lang: Option<String>,
}

impl StreamHeader {
    /// True when the peer speaks XMPP 1.0 or later (stream features, SASL).
    pub fn supports_features(&self) -> bool {
        let Some(version) = self.version.as_deref() else {
            return false;
        };
        let major = version.split('.').next().unwrap_or_default();
        major.trim().parse::<u32>().is_ok_and(|major| major >= 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    StreamOpened(StreamHeader),
    Stanza(Element),
    StreamClosed,
}

type Declarations = Vec<(Option<String>, String)>;

#[derive(Debug)]
struct ArenaNode {
    qname: String,
    name: String,
    ns: Option<String>,
    attrs: Vec<Attribute>,
    children: Vec<ArenaChild>,
    parent: Option<usize>,
    declarations: Declarations,
}

#[derive(Debug)]
enum ArenaChild {
    Node(usize),
    Text(String),
}

/// Default cap on the bytes one unfinished stanza may hold.
pub const DEFAULT_MAX_STANZA_SIZE: usize = 1024 * 1024;

#[derive(Debug)]
pub struct StanzaTreeBuilder {
    pending: Vec<u8>,
    arena: Vec<ArenaNode>,
    current: Option<usize>,
    stream_qname: Option<String>,
    stream_scope: Declarations,
    poisoned: bool,
    /// Names, attribute values and text held by the stanza in the arena.
    held: usize,
    max_stanza_size: usize,
}

impl Default for StanzaTreeBuilder {
    fn default() -> Self {
        Self::with_max_stanza_size(DEFAULT_MAX_STANZA_SIZE)
    }
}

const CDATA_OPEN_LEN: usize = "<![CDATA[".len();

impl StanzaTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_stanza_size(max_stanza_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            arena: Vec::new(),
            current: None,
            stream_qname: None,
            stream_scope: Declarations::new(),
            poisoned: false,
            held: 0,
            max_stanza_size,
        }
    }

    pub fn max_stanza_size(&self) -> usize {
        self.max_stanza_size
    }

    /// Feed the next chunk of the stream, returning everything it completed.
    ///
    /// An error is terminal: the partial tree is discarded and every later
    /// call fails with [`ParseError::Poisoned`] until [`reset`](Self::reset).
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<ParseEvent>, ParseError> {
        if self.poisoned {
            return Err(ParseError::Poisoned);
        }

        self.pending.extend_from_slice(bytes);
        let pending = std::mem::take(&mut self.pending);
        let mut events = Vec::new();

        let result = self.consume(&pending, &mut events).and_then(|committed| {
            let rest = pending.len() - committed;
            if self.held + rest > self.max_stanza_size {
                return Err(self.too_large());
            }
            Ok(committed)
        });

        match result {
            Ok(committed) => {
                self.pending = pending[committed..].to_vec();
                Ok(events)
            }
            Err(error) => {
                self.arena.clear();
                self.current = None;
                self.held = 0;
                self.poisoned = true;
                Err(error)
            }
        }
    }

    /// Forget all parser context, e.g. for a stream restart. The size cap
    /// is kept.
    pub fn reset(&mut self) {
        *self = Self::with_max_stanza_size(self.max_stanza_size);
    }

    fn too_large(&self) -> ParseError {
        ParseError::StanzaTooLarge {
            limit: self.max_stanza_size,
        }
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ParseError> {
        self.held += bytes;
        if self.held > self.max_stanza_size {
            return Err(self.too_large());
        }
        Ok(())
    }

    pub fn is_stream_open(&self) -> bool {
        self.stream_qname.is_some()
    }

    /// Bytes received but not yet part of a complete construct.
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }

    fn consume(&mut self, input: &[u8], events: &mut Vec<ParseEvent>) -> Result<usize, ParseError> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().check_end_names = false;

        let mut committed = 0usize;
        loop {
            let start = reader.buffer_position() as usize;
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    self.open(&element, false, events)?;
                    committed = reader.buffer_position() as usize;
                }
                Ok(Event::Empty(element)) => {
                    self.open(&element, true, events)?;
                    committed = reader.buffer_position() as usize;
                }
                Ok(Event::End(element)) => {
                    let qname = utf8(element.name().as_ref())?.to_string();
                    self.close(&qname, events)?;
                    committed = reader.buffer_position() as usize;
                }
                Ok(Event::Text(text)) => {
                    let end = start + text.len();
                    if end >= input.len() {
                        // More character data may follow in the next chunk.
                        return Ok(committed);
                    }
                    let value = text.unescape().map_err(malformed)?;
                    self.push_text(&value)?;
                    committed = end;
                }
                Ok(Event::CData(data)) => {
                    let value = utf8(&data)?.to_string();
                    self.push_text(&value)?;
                    committed = reader.buffer_position() as usize;
                }
                Ok(Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_)) => {
                    committed = reader.buffer_position() as usize;
                }
                Ok(Event::Eof) => return Ok(committed),
                Err(XmlError::Syntax(
                    SyntaxError::UnclosedTag
                    | SyntaxError::UnclosedComment
                    | SyntaxError::UnclosedCData
                    | SyntaxError::UnclosedDoctype
                    | SyntaxError::UnclosedPIOrXmlDecl,
                )) => return Ok(committed),
                Err(XmlError::Syntax(SyntaxError::InvalidBangMarkup))
                    if input.len() - start < CDATA_OPEN_LEN =>
                {
                    return Ok(committed);
                }
                Err(error) => return Err(malformed(error)),
            }
        }
    }

    fn open(
        &mut self,
        element: &BytesStart<'_>,
        empty: bool,
        events: &mut Vec<ParseEvent>,
    ) -> Result<(), ParseError> {
        let qname = utf8(element.name().as_ref())?.to_string();

        let mut declarations = Declarations::new();
        let mut raw_attrs = Vec::new();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| ParseError::Malformed(e.to_string()))?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value().map_err(malformed)?.into_owned();
            if key == "xmlns" {
                declarations.push((None, value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                declarations.push((Some(prefix.to_string()), value));
            } else {
                raw_attrs.push((key, value));
            }
        }

        let (prefix, local) = split_qname(&qname);

        if self.current.is_none() && local == "stream" {
            let resolved = self.resolve(prefix, &declarations).ok().flatten();
            if prefix == Some("stream") || resolved.as_deref() == Some(ns::STREAM) {
                let header = stream_header(&raw_attrs);
                self.stream_scope = declarations;
                self.stream_qname = Some(qname.clone());
                events.push(ParseEvent::StreamOpened(header));
                if empty {
                    self.stream_qname = None;
                    events.push(ParseEvent::StreamClosed);
                }
                return Ok(());
            }
        }

        let ns = self.resolve(prefix, &declarations)?;
        let mut attrs = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            let (attr_prefix, attr_local) = split_qname(&key);
            let attr_ns = match attr_prefix {
                None => None,
                Some(p) => Some(
                    self.resolve(Some(p), &declarations)?
                        .ok_or_else(|| ParseError::UnboundPrefix(p.to_string()))?,
                ),
            };
            attrs.push(Attribute {
                name: attr_local.to_string(),
                ns: attr_ns,
                value,
            });
        }

        self.charge(
            qname.len()
                + attrs
                    .iter()
                    .map(|attr| attr.name.len() + attr.value.len())
                    .sum::<usize>(),
        )?;

        let index = self.arena.len();
        self.arena.push(ArenaNode {
            name: local.to_string(),
            qname,
            ns,
            attrs,
            children: Vec::new(),
            parent: self.current,
            declarations,
        });
        if let Some(parent) = self.current {
            self.arena[parent].children.push(ArenaChild::Node(index));
        }

        if empty {
            self.finish(index, events);
        } else {
            self.current = Some(index);
        }
        Ok(())
    }

    fn close(&mut self, qname: &str, events: &mut Vec<ParseEvent>) -> Result<(), ParseError> {
        let Some(index) = self.current else {
            if self.stream_qname.as_deref() == Some(qname) {
                self.stream_qname = None;
                events.push(ParseEvent::StreamClosed);
                return Ok(());
            }
            return Err(ParseError::UnexpectedClose(qname.to_string()));
        };

        let expected = &self.arena[index].qname;
        if expected != qname {
            return Err(ParseError::MismatchedTag {
                expected: expected.clone(),
                found: qname.to_string(),
            });
        }
        self.finish(index, events);
        Ok(())
    }

    fn finish(&mut self, index: usize, events: &mut Vec<ParseEvent>) {
        let parent = self.arena[index].parent;
        self.current = parent;
        if parent.is_none() {
            let stanza = self.take_tree(index);
            self.arena.clear();
            self.held = 0;
            events.push(ParseEvent::Stanza(stanza));
        }
    }

    fn take_tree(&mut self, index: usize) -> Element {
        let node = &mut self.arena[index];
        let name = std::mem::take(&mut node.name);
        let ns = node.ns.take();
        let attrs = std::mem::take(&mut node.attrs);
        let children = std::mem::take(&mut node.children);

        let children = children
            .into_iter()
            .map(|child| match child {
                ArenaChild::Node(child) => Node::Element(self.take_tree(child)),
                ArenaChild::Text(text) => Node::Text(text),
            })
            .collect();
        Element::from_parts(name, ns, attrs, children)
    }

    fn push_text(&mut self, text: &str) -> Result<(), ParseError> {
        // Character data between stanzas (keepalives) has no owner.
        let Some(index) = self.current else {
            return Ok(());
        };
        self.charge(text.len())?;
        let children = &mut self.arena[index].children;
        if let Some(ArenaChild::Text(last)) = children.last_mut() {
            last.push_str(text);
        } else {
            children.push(ArenaChild::Text(text.to_string()));
        }
        Ok(())
    }

    fn resolve(
        &self,
        prefix: Option<&str>,
        own: &[(Option<String>, String)],
    ) -> Result<Option<String>, ParseError> {
        if prefix == Some("xml") {
            return Ok(Some(ns::XML.to_string()));
        }

        let lookup = |declarations: &[(Option<String>, String)]| {
            declarations
                .iter()
                .rev()
                .find(|(p, _)| p.as_deref() == prefix)
                .map(|(_, uri)| uri.clone())
        };

        let mut found = lookup(own);
        let mut cursor = self.current;
        while found.is_none() {
            let Some(index) = cursor else {
                break;
            };
            found = lookup(&self.arena[index].declarations);
            cursor = self.arena[index].parent;
        }
        if found.is_none() {
            found = lookup(&self.stream_scope);
        }

        match (found, prefix) {
            (Some(uri), _) if uri.is_empty() => Ok(None),
            (Some(uri), _) => Ok(Some(uri)),
            (None, None) => Ok(None),
            (None, Some(prefix)) => Err(ParseError::UnboundPrefix(prefix.to_string())),
        }
    }
}

fn split_qname(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, qname),
    }
}

fn stream_header(attrs: &[(String, String)]) -> StreamHeader {
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    StreamHeader {
        to: get("to"),
        from: get("from"),
        id: get("id"),
        version: get("version"),
        lang: get("xml:lang"),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)
}

fn malformed(error: impl std::fmt::Display) -> ParseError {
    ParseError::Malformed(error.to_string())
}
