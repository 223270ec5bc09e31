//! Request/response correlation for `<iq/>` queries.
//!
//! Every outgoing query gets a fresh id from a per-connection counter and a
//! continuation keyed by that id. A matching `result` or `error` reply
//! removes the continuation and hands it back exactly once; replies that
//! match nothing are dropped. Continuations never run inside
//! [`IqTracker::send_query`], only later when the owner delivers a reply.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracing::debug;

use crate::element::Element;
use crate::error::ConnectionError;
use crate::stanza::IqType;
use crate::transport::XmppTransport;

/// Deferred reply handler. Receives the connection context and the reply,
/// which may be of type `result` or `error`.
pub type Continuation<C> = Box<dyn FnOnce(&mut C, Element) + Send>;

const ID_PREFIX: &str = "natter";

pub struct IqTracker<C> {
    next_id: u64,
    pending: HashMap<String, Continuation<C>>,
}

impl<C> Default for IqTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for IqTracker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IqTracker")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<C> IqTracker<C> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("{ID_PREFIX}{}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Stamp a fresh id onto `stanza`, write it, and register `continuation`
    /// under that id. Nothing is registered when the write fails.
    pub fn send_query<T: XmppTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        mut stanza: Element,
        continuation: Continuation<C>,
    ) -> Result<String, ConnectionError> {
        let id = self.allocate_id();
        stanza.set_attr("id", id.as_str());
        transport.write(&stanza.to_bytes())?;

        debug!(id = %id, "query sent");
        self.pending.insert(id.clone(), continuation);
        Ok(id)
    }

    /// Register `continuation` for a query the caller already sent under its
    /// own `id`. An id that is already pending keeps its continuation and
    /// the new one is handed back.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        continuation: Continuation<C>,
    ) -> Result<(), Continuation<C>> {
        match self.pending.entry(id.into()) {
            Entry::Occupied(entry) => {
                debug!(id = %entry.key(), "refusing duplicate pending query id");
                Err(continuation)
            }
            Entry::Vacant(entry) => {
                entry.insert(continuation);
                Ok(())
            }
        }
    }

    /// Remove and return the continuation registered for `reply`.
    ///
    /// Only `result` and `error` iqs are considered replies.
    pub fn take(&mut self, reply: &Element) -> Option<Continuation<C>> {
        if !IqType::of(reply).is_some_and(|kind| kind.is_reply()) {
            return None;
        }
        let id = reply.attr("id")?;
        let continuation = self.pending.remove(id);
        if continuation.is_none() {
            debug!(id = %id, "dropping reply with no pending query");
        }
        continuation
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Discard every pending continuation without running it. Ids keep
    /// counting up so none is reused on the same tracker.
    pub fn on_disconnect(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "discarded pending queries on disconnect");
        }
        dropped
    }
}
