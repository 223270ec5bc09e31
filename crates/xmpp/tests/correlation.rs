//! The builder and the correlator working together on raw server bytes.

use natter_xmpp::{Element, IqTracker, ParseEvent, StanzaTreeBuilder};

#[derive(Default)]
struct Delivered {
    replies: Vec<Element>,
}

fn feed_split(stream: &[u8], cut: usize) -> Vec<ParseEvent> {
    let mut builder = StanzaTreeBuilder::new();
    let mut events = builder.feed(&stream[..cut]).unwrap();
    events.extend(builder.feed(&stream[cut..]).unwrap());
    events
}

#[test]
fn reply_split_mid_name_reaches_its_continuation() {
    let mut tracker = IqTracker::<Delivered>::new();
    let registered = tracker.register(
        "42",
        Box::new(|delivered: &mut Delivered, reply: Element| delivered.replies.push(reply)),
    );
    assert!(registered.is_ok());

    let mut builder = StanzaTreeBuilder::new();
    let opened = builder.feed(b"<stream:stream version=\"1.0\"><i").unwrap();
    assert!(matches!(opened.as_slice(), [ParseEvent::StreamOpened(_)]));

    let events = builder.feed(b"q type=\"result\" id=\"42\"><query/></iq>").unwrap();
    let [ParseEvent::Stanza(iq)] = events.as_slice() else {
        panic!("expected exactly one stanza, got {events:?}");
    };
    assert_eq!(iq.name(), "iq");

    let mut delivered = Delivered::default();
    let continuation = tracker.take(iq).expect("continuation for id 42");
    continuation(&mut delivered, iq.clone());

    assert_eq!(delivered.replies.len(), 1);
    assert_eq!(delivered.replies[0].attr("id"), Some("42"));
    assert!(tracker.take(iq).is_none());
    assert_eq!(tracker.pending_count(), 0);
}

#[test]
fn every_cut_of_a_login_exchange_yields_the_same_stanzas() {
    let stream = concat!(
        "<?xml version='1.0'?>",
        "<stream:stream xmlns='jabber:client' xmlns:stream='http://etherx.jabber.org/streams' id='s1' version='1.0'>",
        "<stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features>",
        " ",
        "<iq type='result' id='natter1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>user@home.realm/natter</jid></bind></iq>",
        "<message from='juliet@capulet.lit/balcony' type='chat'><body>Wherefore &amp; why</body></message>",
    )
    .as_bytes();

    let whole = feed_split(stream, stream.len());
    assert_eq!(whole.len(), 4);
    for cut in 0..=stream.len() {
        assert_eq!(feed_split(stream, cut), whole, "cut at byte {cut}");
    }
}
