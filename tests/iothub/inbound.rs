use crate::mock::*;
use iothub_mqtt::iothub::{ConnectionState, MessageDisposition};

const DEVICEBOUND: &str = "devices/dev1/messages/devicebound/";

fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_string(), v.to_string())
}

#[test]
fn test_subscribed_handler_sees_application_properties_only() {
    let mut h = Harness::new();
    h.connect_and_subscribe();

    let topic = format!(
        "{}%24.mid=0209afa7&%24.to=%2Fdevices%2Fdev1%2Fmessages%2Fdevicebound&iothub-ack=full&color=red&note=a%20b",
        DEVICEBOUND
    );
    h.inject(&publish(&topic, b"hello", 7));
    h.pump();

    let received = h.received.borrow().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"hello");
    assert_eq!(
        received[0].properties,
        vec![pair("color", "red"), pair("note", "a b")]
    );
    assert_eq!(h.sent(), vec![Sent::PubAck(7)]);
}

#[test]
fn test_message_without_properties() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    h.inject(&publish(DEVICEBOUND, b"{}", 1));
    h.pump();

    let received = h.received.borrow().clone();
    assert_eq!(received.len(), 1);
    assert!(received[0].properties.is_empty());
}

#[test]
fn test_segments_without_value_are_skipped() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    let topic = format!("{}flag&=orphan&k=v&", DEVICEBOUND);
    h.inject(&publish(&topic, b"", 2));
    h.pump();

    let received = h.received.borrow().clone();
    assert_eq!(received[0].properties, vec![pair("k", "v")]);
}

#[test]
fn test_bad_escape_drops_message_but_acknowledges() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    let topic = format!("{}k=%zz", DEVICEBOUND);
    h.inject(&publish(&topic, b"x", 9));
    h.pump();

    assert!(h.received.borrow().is_empty());
    assert_eq!(h.sent(), vec![Sent::PubAck(9)]);
    assert_eq!(h.transport.state(), ConnectionState::Subscribed);
}

#[test]
fn test_rejected_message_still_acknowledged() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    h.disposition = MessageDisposition::Rejected;
    h.inject(&publish(DEVICEBOUND, b"no", 4));
    h.inject(&publish(DEVICEBOUND, b"thanks", 5));
    h.pump();

    assert_eq!(h.received.borrow().len(), 2);
    assert_eq!(h.sent(), vec![Sent::PubAck(4), Sent::PubAck(5)]);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut h = Harness::new();
    h.connect_and_subscribe();

    h.transport.unsubscribe();
    assert_eq!(h.transport.state(), ConnectionState::Connected);
    match &h.sent()[..] {
        [Sent::Unsubscribe { filter, .. }] => {
            assert_eq!(filter, "devices/dev1/messages/devicebound/#")
        }
        other => panic!("expected UNSUBSCRIBE, got {:?}", other),
    }

    h.inject(&publish(DEVICEBOUND, b"late", 3));
    h.pump();
    assert!(h.received.borrow().is_empty());
    // no resubscribe once withdrawn
    assert_eq!(h.sent(), vec![Sent::PubAck(3)]);
    h.pump();
    assert!(h.sent().is_empty());
}

#[test]
fn test_messages_before_subscribe_are_not_delivered() {
    let mut h = Harness::new();
    h.connect();
    h.inject(&publish(DEVICEBOUND, b"early", 6));
    h.pump();
    assert!(h.received.borrow().is_empty());
}

#[test]
fn test_properties_beyond_capacity_are_left_off() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    let properties: Vec<String> = (0..9).map(|i| format!("k{}=v", i)).collect();
    let topic = format!("{}{}", DEVICEBOUND, properties.join("&"));
    h.inject(&publish(&topic, b"wide", 3));
    h.pump();

    let received = h.received.borrow().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"wide");
    assert_eq!(received[0].properties.len(), 8);
    assert_eq!(received[0].properties[0], pair("k0", "v"));
    assert_eq!(h.sent(), vec![Sent::PubAck(3)]);
}

#[test]
fn test_session_replay_before_resubscribe_is_delivered() {
    let mut h = Harness::new();
    h.connect_and_subscribe();
    h.net.borrow_mut().fail_io = true;
    h.pump();
    h.advance(2_000);
    h.pump();
    h.sent();

    // the broker resumes the stored session and replays before our SUBSCRIBE
    h.inject(&connack(0));
    h.inject(&publish(DEVICEBOUND, b"queued", 11));
    h.pump();
    assert_eq!(h.transport.state(), ConnectionState::Connected);
    let received = h.received.borrow().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, b"queued");
    assert_eq!(h.sent(), vec![Sent::PubAck(11)]);

    h.pump();
    assert_eq!(h.transport.state(), ConnectionState::Subscribing);
}
