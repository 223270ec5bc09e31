pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    /// Server-side stream bytes, e.g. `stream("bind-result.xml")`.
    pub fn stream(name: &str) -> String {
        read_or_panic(Path::new("streams").join(name))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod transport {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use natter_xmpp::{ConnectionError, XmppTransport};

    /// Shared view of everything a [`RecordingTransport`] wrote.
    #[derive(Debug, Clone, Default)]
    pub struct TransportLog {
        written: Arc<Mutex<Vec<u8>>>,
        closed: Arc<AtomicBool>,
    }

    impl TransportLog {
        pub fn bytes(&self) -> Vec<u8> {
            self.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.bytes()).into_owned()
        }

        pub fn len(&self) -> usize {
            self.written.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Return what was written so far and start over.
        pub fn take_text(&self) -> String {
            let bytes = std::mem::take(&mut *self.written.lock().unwrap_or_else(PoisonError::into_inner));
            String::from_utf8_lossy(&bytes).into_owned()
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Transport double that appends every write to a [`TransportLog`].
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        log: TransportLog,
        fail_writes: bool,
    }

    impl RecordingTransport {
        pub fn new() -> (Self, TransportLog) {
            let transport = Self::default();
            let log = transport.log.clone();
            (transport, log)
        }

        /// A transport whose writes fail as if the peer reset the socket.
        pub fn broken() -> (Self, TransportLog) {
            let (mut transport, log) = Self::new();
            transport.fail_writes = true;
            (transport, log)
        }
    }

    impl XmppTransport for RecordingTransport {
        fn write(&mut self, data: &[u8]) -> Result<(), ConnectionError> {
            if self.fail_writes {
                return Err(ConnectionError::TransportError(
                    "connection reset by peer".to_string(),
                ));
            }
            if self.log.is_closed() {
                return Err(ConnectionError::NotConnected);
            }
            self.log.written.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) -> Result<(), ConnectionError> {
            self.log.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

pub mod events {
    use std::sync::{Arc, Mutex, PoisonError};

    use natter_core::EventBusError;
    use natter_core::event::{BroadcastEventBus, Event, EventBus, EventPayload, EventSubscription};

    /// Event bus that keeps a copy of everything published and forwards it
    /// to a real [`BroadcastEventBus`].
    #[derive(Clone, Default)]
    pub struct RecordingEventBus {
        inner: BroadcastEventBus,
        published: Arc<Mutex<Vec<Event>>>,
    }

    impl RecordingEventBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<Event> {
            self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        pub fn payloads(&self) -> Vec<EventPayload> {
            self.events().into_iter().map(|event| event.payload).collect()
        }

        /// Drain the recorded payloads.
        pub fn take_payloads(&self) -> Vec<EventPayload> {
            std::mem::take(&mut *self.published.lock().unwrap_or_else(PoisonError::into_inner))
                .into_iter()
                .map(|event| event.payload)
                .collect()
        }

        pub fn channels(&self) -> Vec<String> {
            self.events()
                .iter()
                .map(|event| event.channel.to_string())
                .collect()
        }
    }

    impl EventBus for RecordingEventBus {
        fn publish(&self, event: Event) -> Result<(), EventBusError> {
            self.published.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
            self.inner.publish(event)
        }

        fn subscribe(&self, pattern: &str) -> Result<EventSubscription, EventBusError> {
            self.inner.subscribe(pattern)
        }
    }
}
