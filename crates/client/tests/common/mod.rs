#![allow(dead_code)]

use std::sync::Arc;

use natter_client::Connection;
use natter_core::EventPayload;
use natter_core::config::load_config_from_str;
use natter_test_support::events::RecordingEventBus;
use natter_test_support::fixtures;
use natter_test_support::transport::{RecordingTransport, TransportLog};

pub struct Harness {
    pub connection: Connection<RecordingTransport>,
    pub wire: TransportLog,
    pub bus: RecordingEventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&fixtures::config("minimal.toml"))
    }

    pub fn with_config(toml: &str) -> Self {
        let config = load_config_from_str(toml).unwrap();
        let (transport, wire) = RecordingTransport::new();
        let bus = RecordingEventBus::new();
        let connection = Connection::new(&config, transport, Arc::new(bus.clone())).unwrap();
        Self {
            connection,
            wire,
            bus,
        }
    }

    /// A connection that completed SASL login and received its roster, with
    /// the wire log and the recorded events emptied.
    pub fn bound() -> Self {
        Self::bound_with(Self::new())
    }

    pub fn bound_with(mut harness: Self) -> Self {
        harness.connection.on_connected();
        harness.feed_fixture("server-open.xml");
        harness.feed_fixture("features-sasl.xml");
        harness.feed_fixture("sasl-success.xml");
        harness.feed_fixture("server-open.xml");
        harness.feed_fixture("features-bind.xml");
        harness.feed_fixture("bind-result.xml");
        harness.feed_fixture("roster-result.xml");
        assert!(harness.connection.bound_jid().is_some(), "login did not bind");
        harness.wire.take_text();
        harness.bus.take_payloads();
        harness
    }

    pub fn feed(&mut self, bytes: &str) {
        self.connection.on_bytes(bytes.as_bytes());
    }

    pub fn feed_fixture(&mut self, name: &str) {
        self.feed(&fixtures::stream(name));
    }

    pub fn sent(&self) -> String {
        self.wire.take_text()
    }

    pub fn events(&self) -> Vec<EventPayload> {
        self.bus.take_payloads()
    }
}
