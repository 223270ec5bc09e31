use chrono::{DateTime, Utc};
#[cfg(feature = "native")]
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
#[cfg(feature = "native")]
use tokio::sync::broadcast;
use uuid::Uuid;

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, crate::error::EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(crate::error::EventBusError::InvalidChannel(name))
        }
    }

    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        matches!(name.split('.').next(), Some("system" | "xmpp" | "ui"))
    }

    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// The envelope wrapping every event the engine emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "xmpp.roster.changed")
    pub channel: Channel,

    pub timestamp: DateTime<Utc>,

    pub id: Uuid,

    /// Links related events, e.g. the replies to one command
    pub correlation_id: Option<Uuid>,

    pub source: EventSource,

    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            correlation_id: None,
            source,
            payload,
        }
    }

    pub fn with_correlation(
        channel: Channel,
        source: EventSource,
        payload: EventPayload,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::new(channel, source, payload)
        }
    }

    /// Wrap a payload on its own channel.
    pub fn from_payload(
        source: EventSource,
        payload: EventPayload,
    ) -> std::result::Result<Self, crate::error::EventBusError> {
        let channel = Channel::new(payload.channel())?;
        Ok(Self::new(channel, source, payload))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    System(String),
    Xmpp,
    Ui,
}

/// Identifies a chat room by its (room, server) pair.
///
/// Both parts are lowercased so that one room never maps to two sessions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoomId {
    pub room: String,
    pub server: String,
}

impl RoomId {
    pub fn new(room: &str, server: &str) -> Self {
        Self {
            room: room.to_lowercase(),
            server: server.to_lowercase(),
        }
    }

    /// Split a `room@server` address, ignoring any `/handle` suffix.
    pub fn parse(address: &str) -> Option<Self> {
        let bare = address.split('/').next().unwrap_or(address);
        let (room, server) = bare.split_once('@')?;
        if room.is_empty() || server.is_empty() {
            return None;
        }
        Some(Self::new(room, server))
    }

    pub fn address(&self) -> String {
        format!("{}@{}", self.room, self.server)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.room, self.server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionErrorKind {
    /// Malformed byte stream
    Protocol,
    Authentication,
    /// `<stream:error/>` or failed negotiation
    Stream,
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── Connection ─────────────────────────────────────────────────
    ConnectionEstablished {
        jid: String,
    },
    /// Terminal: the connection must be torn down.
    ConnectionError {
        kind: ConnectionErrorKind,
        message: String,
    },

    // ── Buddies and roster ─────────────────────────────────────────
    BuddySignedOn {
        address: String,
    },
    BuddySignedOff {
        address: String,
    },
    SubscriptionRequested {
        address: String,
    },
    RosterChanged {
        address: String,
        alias: Option<String>,
        subscription: Subscription,
        ask_pending: bool,
        groups: Vec<String>,
    },
    RosterError {
        address: String,
        message: String,
    },

    // ── Messages ───────────────────────────────────────────────────
    MessageReceived {
        from: String,
        body: String,
        flags: MessageFlags,
        timestamp: DateTime<Utc>,
    },
    ChatStateChanged {
        from: String,
        state: ChatState,
    },

    // ── Multi-user chat ────────────────────────────────────────────
    RoomJoined {
        room_id: RoomId,
    },
    RoomLeft {
        room_id: RoomId,
    },
    RoomTopicChanged {
        room_id: RoomId,
        who: Option<String>,
        topic: String,
    },
    MemberJoined {
        room_id: RoomId,
        handle: String,
    },
    MemberLeft {
        room_id: RoomId,
        handle: String,
    },
    MemberRenamed {
        room_id: RoomId,
        old_handle: String,
        new_handle: String,
    },
    MemberStatusChanged {
        room_id: RoomId,
        handle: String,
        show: PresenceShow,
        status: Option<String>,
    },
    /// The server created the room and holds it locked until configured.
    RoomCreated {
        room_id: RoomId,
    },
    RoomConfigurationRequested {
        room_id: RoomId,
        form: DataForm,
    },
    RoomRegistrationRequested {
        room_id: RoomId,
        form: DataForm,
    },
    RoomInvitationReceived {
        room_id: RoomId,
        from: String,
        reason: Option<String>,
        password: Option<String>,
    },
    RoomListReceived {
        server: String,
        rooms: Vec<RoomListing>,
    },
    RoomNotice {
        room_id: RoomId,
        message: String,
    },
    RoomError {
        room_id: RoomId,
        message: String,
    },
}

impl EventPayload {
    /// The channel this payload is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            EventPayload::ConnectionEstablished { .. } => "xmpp.connection.established",
            EventPayload::ConnectionError { .. } => "xmpp.connection.error",
            EventPayload::BuddySignedOn { .. } => "xmpp.presence.online",
            EventPayload::BuddySignedOff { .. } => "xmpp.presence.offline",
            EventPayload::SubscriptionRequested { .. } => "xmpp.subscription.requested",
            EventPayload::RosterChanged { .. } => "xmpp.roster.changed",
            EventPayload::RosterError { .. } => "xmpp.roster.error",
            EventPayload::MessageReceived { .. } => "xmpp.message.received",
            EventPayload::ChatStateChanged { .. } => "xmpp.chatstate.changed",
            EventPayload::RoomJoined { .. } => "xmpp.muc.joined",
            EventPayload::RoomLeft { .. } => "xmpp.muc.left",
            EventPayload::RoomTopicChanged { .. } => "xmpp.muc.subject.changed",
            EventPayload::MemberJoined { .. } => "xmpp.muc.member.joined",
            EventPayload::MemberLeft { .. } => "xmpp.muc.member.left",
            EventPayload::MemberRenamed { .. } => "xmpp.muc.member.renamed",
            EventPayload::MemberStatusChanged { .. } => "xmpp.muc.member.status",
            EventPayload::RoomCreated { .. } => "xmpp.muc.created",
            EventPayload::RoomConfigurationRequested { .. } => "xmpp.muc.config.requested",
            EventPayload::RoomRegistrationRequested { .. } => "xmpp.muc.register.requested",
            EventPayload::RoomInvitationReceived { .. } => "xmpp.muc.invite.received",
            EventPayload::RoomListReceived { .. } => "xmpp.muc.list.received",
            EventPayload::RoomNotice { .. } => "xmpp.muc.notice",
            EventPayload::RoomError { .. } => "xmpp.muc.error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Subscription {
    None,
    To,
    From,
    Both,
    Remove,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::None => "none",
            Subscription::To => "to",
            Subscription::From => "from",
            Subscription::Both => "both",
            Subscription::Remove => "remove",
        }
    }

    /// Whether the account receives the contact's presence.
    pub fn has_outbound(&self) -> bool {
        matches!(self, Subscription::To | Subscription::Both)
    }
}

impl std::str::FromStr for Subscription {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "to" => Subscription::To,
            "from" => Subscription::From,
            "both" => Subscription::Both,
            "remove" => Subscription::Remove,
            _ => Subscription::None,
        })
    }
}

/// Properties of a received message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFlags {
    pub groupchat: bool,
    pub headline: bool,
    /// Stored and forwarded; the timestamp is the original send time
    pub delayed: bool,
    pub error: bool,
}

/// XMPP presence "show" values (RFC 6121 section 4.7.2.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceShow {
    #[default]
    Available,
    Chat,
    Away,
    Xa,
    Dnd,
    Unavailable,
}

impl PresenceShow {
    /// Parse a `<show/>` value; absent or unknown means available.
    pub fn from_show(value: Option<&str>) -> Self {
        match value {
            Some("chat") => PresenceShow::Chat,
            Some("away") => PresenceShow::Away,
            Some("xa") => PresenceShow::Xa,
            Some("dnd") => PresenceShow::Dnd,
            _ => PresenceShow::Available,
        }
    }
}

/// XEP-0085 Chat State Notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatState {
    Active,
    Composing,
    Paused,
    Inactive,
    Gone,
}

impl ChatState {
    pub fn from_element_name(name: &str) -> Option<Self> {
        match name {
            "active" => Some(ChatState::Active),
            "composing" => Some(ChatState::Composing),
            "paused" => Some(ChatState::Paused),
            "inactive" => Some(ChatState::Inactive),
            "gone" => Some(ChatState::Gone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MucAffiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    #[default]
    None,
}

impl MucAffiliation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MucAffiliation::Owner => "owner",
            MucAffiliation::Admin => "admin",
            MucAffiliation::Member => "member",
            MucAffiliation::Outcast => "outcast",
            MucAffiliation::None => "none",
        }
    }
}

impl std::str::FromStr for MucAffiliation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "owner" => MucAffiliation::Owner,
            "admin" => MucAffiliation::Admin,
            "member" => MucAffiliation::Member,
            "outcast" => MucAffiliation::Outcast,
            _ => MucAffiliation::None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MucRole {
    Moderator,
    Participant,
    Visitor,
    #[default]
    None,
}

impl MucRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MucRole::Moderator => "moderator",
            MucRole::Participant => "participant",
            MucRole::Visitor => "visitor",
            MucRole::None => "none",
        }
    }
}

impl std::str::FromStr for MucRole {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "moderator" => MucRole::Moderator,
            "participant" => MucRole::Participant,
            "visitor" => MucRole::Visitor,
            _ => MucRole::None,
        })
    }
}

/// A XEP-0004 data form, as presented for room configuration or
/// registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataForm {
    pub form_type: FormType,
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub fields: Vec<FormField>,
}

impl DataForm {
    pub fn field(&self, var: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.var.as_deref() == Some(var))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormType {
    #[default]
    Form,
    Submit,
    Cancel,
    Result,
}

impl FormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormType::Form => "form",
            FormType::Submit => "submit",
            FormType::Cancel => "cancel",
            FormType::Result => "result",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub var: Option<String>,
    pub label: Option<String>,
    /// e.g. "text-single", "boolean", "list-multi"
    pub field_type: Option<String>,
    pub required: bool,
    pub values: Vec<String>,
    pub options: Vec<FormOption>,
}

impl FormField {
    pub fn new(var: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            var: Some(var.into()),
            values,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormOption {
    pub label: Option<String>,
    pub value: String,
}

/// One entry of a conference server's room directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListing {
    pub address: String,
    pub name: Option<String>,
}

#[cfg(feature = "native")]
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError>;
    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError>;
}

#[cfg(feature = "native")]
#[derive(Clone)]
pub struct BroadcastEventBus {
    system_sender: broadcast::Sender<Event>,
    xmpp_sender: broadcast::Sender<Event>,
    ui_sender: broadcast::Sender<Event>,
}

#[cfg(feature = "native")]
impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let capacity = channel_capacity.max(1);
        let (system_sender, _) = broadcast::channel(capacity);
        let (xmpp_sender, _) = broadcast::channel(capacity);
        let (ui_sender, _) = broadcast::channel(capacity);

        Self {
            system_sender,
            xmpp_sender,
            ui_sender,
        }
    }

    fn sender_for_domain(&self, domain: &str) -> Option<&broadcast::Sender<Event>> {
        match domain {
            "system" => Some(&self.system_sender),
            "xmpp" => Some(&self.xmpp_sender),
            "ui" => Some(&self.ui_sender),
            _ => None,
        }
    }

    fn receivers_for_pattern(
        &self,
        pattern: &str,
    ) -> std::result::Result<DomainReceivers, crate::error::EventBusError> {
        let first_segment = pattern.split('.').next().unwrap_or_default();

        if first_segment.is_empty() {
            return Err(crate::error::EventBusError::InvalidPattern(
                pattern.to_string(),
            ));
        }

        if has_glob_meta(first_segment) {
            return Ok(DomainReceivers {
                system: Some(self.system_sender.subscribe()),
                xmpp: Some(self.xmpp_sender.subscribe()),
                ui: Some(self.ui_sender.subscribe()),
            });
        }

        let mut receivers = DomainReceivers {
            system: None,
            xmpp: None,
            ui: None,
        };
        match first_segment {
            "system" => receivers.system = Some(self.system_sender.subscribe()),
            "xmpp" => receivers.xmpp = Some(self.xmpp_sender.subscribe()),
            "ui" => receivers.ui = Some(self.ui_sender.subscribe()),
            _ => {
                return Err(crate::error::EventBusError::InvalidPattern(
                    pattern.to_string(),
                ));
            }
        }
        Ok(receivers)
    }
}

#[cfg(feature = "native")]
impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(feature = "native")]
impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> std::result::Result<(), crate::error::EventBusError> {
        let sender = self
            .sender_for_domain(event.channel.domain())
            .ok_or_else(|| {
                crate::error::EventBusError::InvalidChannel(event.channel.to_string())
            })?;

        let _ = sender.send(event);
        Ok(())
    }

    fn subscribe(
        &self,
        pattern: &str,
    ) -> std::result::Result<EventSubscription, crate::error::EventBusError> {
        let matcher = Glob::new(pattern)
            .map_err(|_| crate::error::EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();
        let receivers = self.receivers_for_pattern(pattern)?;

        Ok(EventSubscription { matcher, receivers })
    }
}

#[cfg(feature = "native")]
struct DomainReceivers {
    system: Option<broadcast::Receiver<Event>>,
    xmpp: Option<broadcast::Receiver<Event>>,
    ui: Option<broadcast::Receiver<Event>>,
}

#[cfg(feature = "native")]
pub struct EventSubscription {
    matcher: GlobMatcher,
    receivers: DomainReceivers,
}

#[cfg(feature = "native")]
impl EventSubscription {
    pub async fn recv(&mut self) -> std::result::Result<Event, crate::error::EventBusError> {
        loop {
            let received = tokio::select! {
                result = recv_from_domain(self.receivers.system.as_mut()) => result,
                result = recv_from_domain(self.receivers.xmpp.as_mut()) => result,
                result = recv_from_domain(self.receivers.ui.as_mut()) => result,
            };

            match received {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(crate::error::EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(crate::error::EventBusError::Lagged(count));
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing
    /// matching is queued.
    pub fn try_recv(&mut self) -> Option<std::result::Result<Event, crate::error::EventBusError>> {
        loop {
            let mut drained = true;
            for receiver in [
                self.receivers.system.as_mut(),
                self.receivers.xmpp.as_mut(),
                self.receivers.ui.as_mut(),
            ]
            .into_iter()
            .flatten()
            {
                match receiver.try_recv() {
                    Ok(event) if self.matcher.is_match(event.channel.as_str()) => {
                        return Some(Ok(event));
                    }
                    Ok(_) => drained = false,
                    Err(broadcast::error::TryRecvError::Lagged(count)) => {
                        return Some(Err(crate::error::EventBusError::Lagged(count)));
                    }
                    Err(broadcast::error::TryRecvError::Closed) => {
                        return Some(Err(crate::error::EventBusError::ChannelClosed));
                    }
                    Err(broadcast::error::TryRecvError::Empty) => {}
                }
            }
            if drained {
                return None;
            }
        }
    }
}

#[cfg(feature = "native")]
async fn recv_from_domain(
    receiver: Option<&mut broadcast::Receiver<Event>>,
) -> std::result::Result<Event, broadcast::error::RecvError> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(feature = "native")]
fn has_glob_meta(segment: &str) -> bool {
    segment.contains(['*', '?', '[', ']', '{', '}', '!'])
}


#[cfg(all(test, feature = "native"))]
mod event_bus_tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::error::EventBusError;

    fn xmpp_event(payload: EventPayload) -> Event {
        Event::from_payload(EventSource::Xmpp, payload).expect("valid channel")
    }

    fn signed_on(address: &str) -> EventPayload {
        EventPayload::BuddySignedOn {
            address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_routes_to_matching_subscriber() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.presence.*").unwrap();

        bus.publish(xmpp_event(signed_on("alice@example.com")))
            .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .expect("recv failed");
        assert_eq!(event.channel.as_str(), "xmpp.presence.online");
    }

    #[tokio::test]
    async fn glob_filters_non_matching_channels_within_domain() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.muc.**").unwrap();

        bus.publish(xmpp_event(signed_on("alice@example.com")))
            .unwrap();
        bus.publish(xmpp_event(EventPayload::RoomJoined {
            room_id: RoomId::new("lobby", "muc.example.com"),
        }))
        .unwrap();

        let event = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out")
            .expect("recv failed");
        assert_eq!(event.channel.as_str(), "xmpp.muc.joined");
    }

    #[tokio::test]
    async fn events_within_domain_preserve_publish_order() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.**").unwrap();

        for n in 0..5 {
            bus.publish(xmpp_event(signed_on(&format!("user{n}@example.com"))))
                .unwrap();
        }

        for n in 0..5 {
            let event = sub.recv().await.unwrap();
            let EventPayload::BuddySignedOn { address } = event.payload else {
                panic!("unexpected payload");
            };
            assert_eq!(address, format!("user{n}@example.com"));
        }
    }

    #[tokio::test]
    async fn try_recv_drains_without_blocking() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("**").unwrap();
        assert!(sub.try_recv().is_none());

        bus.publish(xmpp_event(signed_on("alice@example.com")))
            .unwrap();
        assert!(matches!(sub.try_recv(), Some(Ok(_))));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn subscribe_rejects_unknown_domain_and_empty_pattern() {
        let bus = BroadcastEventBus::default();
        assert!(matches!(
            bus.subscribe("plugin.*"),
            Err(EventBusError::InvalidPattern(_))
        ));
        assert!(matches!(
            bus.subscribe(""),
            Err(EventBusError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn lagged_subscriber_returns_lagged_error() {
        let bus = BroadcastEventBus::new(2);
        let mut sub = bus.subscribe("xmpp.**").unwrap();

        for n in 0..5 {
            bus.publish(xmpp_event(signed_on(&format!("user{n}@example.com"))))
                .unwrap();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(EventBusError::Lagged(_))));
    }

    #[tokio::test]
    async fn channel_closed_when_bus_dropped() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe("xmpp.**").unwrap();
        drop(bus);

        let result = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timed out");
        assert!(matches!(result, Err(EventBusError::ChannelClosed)));
    }

    #[tokio::test]
    async fn trait_object_publish_and_subscribe() {
        let bus: std::sync::Arc<dyn EventBus> = std::sync::Arc::new(BroadcastEventBus::default());
        let mut sub = bus.subscribe("xmpp.**").unwrap();
        bus.publish(xmpp_event(signed_on("alice@example.com")))
            .unwrap();
        assert!(sub.recv().await.is_ok());
    }
}
