use crate::mock::*;
use iothub_mqtt::iothub::{ClientConfig, ConfirmationResult, ConnectionState, Message, RetryPolicy, SendStatus};

#[test]
fn test_publish_without_properties_and_puback() {
    let mut h = Harness::new();
    h.connect_and_subscribe();

    h.send(1, Message::new(b"{\"temp\":21}").unwrap());
    assert_eq!(h.transport.get_send_status(&h.queue), SendStatus::Busy);
    h.pump();

    let sent = h.sent();
    let packet_id = match &sent[..] {
        [Sent::Publish {
            topic,
            packet_id: Some(id),
            payload,
        }] => {
            assert_eq!(topic, "devices/dev1/messages/events/");
            assert_eq!(payload, b"{\"temp\":21}");
            *id
        }
        other => panic!("expected one PUBLISH, got {:?}", other),
    };
    assert_eq!(h.transport.in_flight_count(), 1);
    assert!(h.queue.is_empty());
    assert_eq!(h.transport.get_send_status(&h.queue), SendStatus::Busy);
    assert!(h.results().is_empty());

    h.inject(&puback(packet_id));
    h.pump();
    assert_eq!(h.results(), vec![(1, ConfirmationResult::Ok)]);
    assert_eq!(h.transport.in_flight_count(), 0);
    assert_eq!(h.transport.get_send_status(&h.queue), SendStatus::Idle);
}

#[test]
fn test_application_properties_in_topic() {
    let mut h = Harness::new();
    h.connect();

    let mut message = Message::new(b"").unwrap();
    message.properties_mut().insert("propKey1", "propValue1").unwrap();
    message.properties_mut().insert("propKey2", "propValue2").unwrap();
    h.send(1, message);
    h.pump();

    let published = h.published();
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0].0,
        "devices/dev1/messages/events/propKey1=propValue1&propKey2=propValue2"
    );
}

#[test]
fn test_duplicate_puback_resolves_once() {
    let mut h = Harness::new();
    h.connect();
    h.send(1, Message::new(b"a").unwrap());
    h.send(2, Message::new(b"b").unwrap());
    h.pump();
    let published = h.published();
    assert_eq!(published.len(), 2);
    let (first, second) = (published[0].1, published[1].1);
    assert_ne!(first, second);

    h.inject(&puback(first));
    h.inject(&puback(first));
    h.pump();
    assert_eq!(h.results(), vec![(1, ConfirmationResult::Ok)]);

    h.inject(&puback(first));
    h.inject(&puback(0x7777));
    h.pump();
    assert_eq!(h.results(), vec![(1, ConfirmationResult::Ok)]);
    assert_eq!(h.transport.in_flight_count(), 1);

    h.inject(&puback(second));
    h.pump();
    assert_eq!(
        h.results(),
        vec![(1, ConfirmationResult::Ok), (2, ConfirmationResult::Ok)]
    );
}

#[test]
fn test_unacknowledged_message_is_retried_then_times_out() {
    let mut h = Harness::new();
    h.connect();
    h.send(1, Message::new(b"lost").unwrap());
    h.pump();
    let mut ids = vec![h.published()[0].1];

    // not overdue until the resend interval has fully passed
    h.advance(60_000);
    h.pump();
    assert!(h.published().is_empty());

    for _ in 0..2 {
        h.advance(1);
        h.pump();
        let republished = h.published();
        assert_eq!(republished.len(), 1);
        assert_eq!(republished[0].0, "devices/dev1/messages/events/");
        ids.push(republished[0].1);
        assert!(h.results().is_empty());
        h.advance(60_000);
        h.pump();
    }

    h.advance(1);
    h.pump();
    assert!(h.published().is_empty());
    assert_eq!(h.results(), vec![(1, ConfirmationResult::MessageTimeout)]);
    assert_eq!(h.transport.in_flight_count(), 0);

    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3, "every resend uses a fresh packet id");
}

#[test]
fn test_late_puback_for_old_id_is_ignored_after_resend() {
    let mut h = Harness::new();
    h.connect();
    h.send(1, Message::new(b"x").unwrap());
    h.pump();
    let old = h.published()[0].1;
    h.advance(60_001);
    h.pump();
    let new = h.published()[0].1;

    h.inject(&puback(old));
    h.pump();
    assert!(h.results().is_empty());
    h.inject(&puback(new));
    h.pump();
    assert_eq!(h.results(), vec![(1, ConfirmationResult::Ok)]);
}

#[test]
fn test_custom_retry_policy() {
    let mut config = keyed_config();
    config.retry_policy = RetryPolicy {
        resend_interval_secs: 5,
        max_retries: 0,
    };
    let mut h = Harness::with_config(&config);
    h.connect();
    h.send(7, Message::new(b"x").unwrap());
    h.pump();
    h.published();

    h.advance(5_001);
    h.pump();
    assert!(h.published().is_empty());
    assert_eq!(h.results(), vec![(7, ConfirmationResult::MessageTimeout)]);
}

#[test]
fn test_timeout_fires_while_disconnected() {
    let mut h = Harness::new();
    h.connect();
    h.send(1, Message::new(b"x").unwrap());
    h.pump();
    for _ in 0..2 {
        h.advance(60_001);
        h.pump();
    }
    assert_eq!(h.published().len(), 3);

    h.net.borrow_mut().fail_io = true;
    h.pump();
    h.net.borrow_mut().refuse = true;
    assert_eq!(h.transport.state(), ConnectionState::Disconnected);

    h.advance(60_001);
    h.pump();
    assert_eq!(h.results(), vec![(1, ConfirmationResult::MessageTimeout)]);
}

#[test]
fn test_pending_messages_wait_for_connection() {
    let mut h = Harness::new();
    h.send(1, Message::new(b"early").unwrap());
    h.pump();
    assert!(h.published().is_empty());
    assert_eq!(h.queue.len(), 1);

    h.inject(&connack(0));
    h.pump();
    h.pump();
    assert_eq!(h.published().len(), 1);
    assert!(h.queue.is_empty());
}

#[test]
fn test_in_flight_is_bounded() {
    let mut h = Harness::new();
    h.connect();
    for i in 0..10 {
        h.send(i, Message::new(b"burst").unwrap());
    }
    h.pump();
    let published = h.published();
    assert_eq!(published.len(), 8);
    assert_eq!(h.queue.len(), 2);
    assert_eq!(h.transport.in_flight_count(), 8);

    h.inject(&puback(published[0].1));
    h.pump();
    h.pump();
    assert_eq!(h.published().len(), 1);
    assert_eq!(h.queue.len(), 1);
}

#[test]
fn test_write_failure_resolves_with_error() {
    let mut h = Harness::new();
    h.connect();
    h.net.borrow_mut().fail_io = true;
    h.send(1, Message::new(b"x").unwrap());
    h.send(2, Message::new(b"y").unwrap());
    h.pump();

    assert_eq!(h.results(), vec![(1, ConfirmationResult::Error)]);
    assert_eq!(h.transport.state(), ConnectionState::Disconnected);
    // the second message waits for the next connection
    assert_eq!(h.queue.len(), 1);
}

#[test]
fn test_every_message_resolved_exactly_once() {
    let mut h = Harness::new();
    h.connect();
    for i in 0..6 {
        h.send(i, Message::new(b"m").unwrap());
    }
    h.pump();
    let published = h.published();
    h.inject(&puback(published[0].1));
    h.inject(&puback(published[2].1));
    h.pump();

    h.net.borrow_mut().fail_io = true;
    h.pump();
    assert_eq!(h.transport.state(), ConnectionState::Disconnected);
    h.net.borrow_mut().refuse = true;
    h.send(6, Message::new(b"late").unwrap());
    h.pump();

    let mut results = h.destroy();
    results.sort_by_key(|(id, _)| *id);
    let ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(results[0].1, ConfirmationResult::Ok);
    assert_eq!(results[2].1, ConfirmationResult::Ok);
    assert_eq!(results[6].1, ConfirmationResult::BecauseDestroy);
}

#[test]
fn test_destroy_resolves_pending_and_in_flight() {
    let mut h = Harness::new();
    h.connect();
    h.send(1, Message::new(b"in flight").unwrap());
    h.pump();
    assert_eq!(h.transport.in_flight_count(), 1);
    h.send(2, Message::new(b"pending").unwrap());
    let net = h.net.clone();

    let mut results = h.destroy();
    results.sort_by_key(|(id, _)| *id);
    assert_eq!(
        results,
        vec![
            (1, ConfirmationResult::BecauseDestroy),
            (2, ConfirmationResult::BecauseDestroy)
        ]
    );
    assert!(!net.borrow().open);
    let sent = parse_packets(&net.borrow().outbound);
    assert_eq!(sent.last(), Some(&Sent::Disconnect));
}

#[test]
fn test_drop_resolves_in_flight() {
    let results;
    {
        let mut h = Harness::new();
        h.connect();
        h.send(1, Message::new(b"x").unwrap());
        h.pump();
        results = h.results.clone();
    }
    assert_eq!(*results.borrow(), vec![(1, ConfirmationResult::BecauseDestroy)]);
}

#[test]
fn test_gateway_host_is_used() {
    let mut config: ClientConfig = keyed_config();
    config.protocol_gateway_host_name = Some("edge.local");
    let mut h = Harness::with_config(&config);
    h.pump();
    assert_eq!(h.net.borrow().hosts, vec!["edge.local".to_string()]);
    assert_eq!(h.transport.get_hostname().unwrap().as_str(), "edge.local");
}
