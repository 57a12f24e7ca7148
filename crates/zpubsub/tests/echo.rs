// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end publish/receive over explicit endpoints.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zpubsub::transport::PubSocket;
use zpubsub::{
    Context, Error, Event, EventId, EventRegistry, Publisher, Result, Session, Subscriber,
};

const ROUNDS: usize = 10;

fn quiet_context() -> Arc<Context> {
    Context::builder().no_discovery().build()
}

fn publisher(uri: &str) -> Publisher {
    Publisher::builder()
        .uri(uri)
        .session("s1")
        .context(quiet_context())
        .build()
        .expect("Failed to create publisher")
}

fn subscriber(uri: &str) -> Subscriber {
    Subscriber::builder()
        .uri(uri)
        .context(quiet_context())
        .build()
        .expect("Failed to create subscriber")
}

/// Publish then receive until one message is delivered.
fn deliver(publisher: &mut Publisher, subscriber: &Subscriber, id: EventId, payload: &[u8]) -> bool {
    for _ in 0..ROUNDS {
        assert!(publisher.publish(id, payload));
        if subscriber
            .receive(Duration::from_millis(100))
            .expect("receive failed")
        {
            return true;
        }
    }
    false
}

#[test]
fn test_echo_over_explicit_uri() {
    let mut publisher = publisher("tcp://*:0");
    assert!(publisher.uri().is_fully_qualified());
    assert!(!publisher.address().contains('*'));

    let subscriber = subscriber(&publisher.uri().to_string());
    let id = EventId::from_parts(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    assert!(subscriber.subscribe(id, move |payload| {
        sink.lock().push(payload.to_vec());
    }));

    assert!(deliver(&mut publisher, &subscriber, id, b"hello"));
    assert_eq!(received.lock().first(), Some(&b"hello".to_vec()));
}

#[test]
fn test_empty_payload_delivers_empty_slice() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let id = EventId::from_name("test.Empty");
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lengths);
    subscriber.subscribe(id, move |payload| sink.lock().push(payload.len()));

    assert!(deliver(&mut publisher, &subscriber, id, b""));
    assert_eq!(lengths.lock().first(), Some(&0));
}

#[test]
fn test_double_subscribe_keeps_first_callback() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let id = EventId::from_name("test.Double");

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let (f, s) = (Arc::clone(&first), Arc::clone(&second));
    assert!(subscriber.subscribe(id, move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(!subscriber.subscribe(id, move |_| {
        s.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(deliver(&mut publisher, &subscriber, id, b"x"));
    assert!(first.load(Ordering::SeqCst) >= 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let id = EventId::from_name("test.Unsubscribe");
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    subscriber.subscribe(id, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert!(deliver(&mut publisher, &subscriber, id, b"before"));
    assert!(subscriber.unsubscribe(id));
    assert!(!subscriber.unsubscribe(id));

    let delivered = count.load(Ordering::SeqCst);
    for _ in 0..5 {
        publisher.publish(id, b"after");
        assert!(!subscriber
            .receive(Duration::from_millis(50))
            .expect("in-flight messages must be discarded silently"));
    }
    assert_eq!(count.load(Ordering::SeqCst), delivered);
}

#[test]
fn test_only_subscribed_ids_are_delivered() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let wanted = EventId::from_name("test.Wanted");
    let other = EventId::from_name("test.Other");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    subscriber.subscribe(wanted, move |p| sink.lock().push(p.to_vec()));

    assert!(deliver(&mut publisher, &subscriber, wanted, b"w"));
    publisher.publish(other, b"o");
    publisher.publish(wanted, b"w2");

    let mut rounds = 0;
    while !seen.lock().contains(&b"w2".to_vec()) {
        rounds += 1;
        assert!(rounds <= ROUNDS, "second wanted message never arrived");
        subscriber
            .receive(Duration::from_millis(100))
            .expect("receive failed");
    }
    assert!(seen.lock().iter().all(|p| p.starts_with(b"w")));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Position {
    x: f64,
    y: f64,
}

impl Event for Position {
    const NAME: &'static str = "test.Position";

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[test]
fn test_typed_event_into_shared_target() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let target = Arc::new(Mutex::new(Position { x: 0.0, y: 0.0 }));
    assert!(subscriber.subscribe_into(Arc::clone(&target)));

    let position = Position { x: 1.5, y: -2.0 };
    let mut delivered = false;
    for _ in 0..ROUNDS {
        assert!(publisher.publish_event(&position));
        if subscriber
            .receive(Duration::from_millis(100))
            .expect("receive failed")
        {
            delivered = true;
            break;
        }
    }
    assert!(delivered);
    assert_eq!(*target.lock(), position);
}

#[test]
fn test_json_bridge() {
    let mut registry = EventRegistry::new();
    assert!(registry.register::<Position>());

    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = subscriber(&publisher.uri().to_string());
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    subscriber.subscribe_json(&registry, Position::event_id(), move |json| {
        *sink.lock() = Some(json);
    });

    let json = serde_json::json!({ "x": 3.0, "y": 4.0 });
    let mut delivered = false;
    for _ in 0..ROUNDS {
        assert!(publisher.publish_json(&registry, Position::NAME, &json));
        if subscriber
            .receive(Duration::from_millis(100))
            .expect("receive failed")
        {
            delivered = true;
            break;
        }
    }
    assert!(delivered);
    assert_eq!(seen.lock().clone(), Some(json));
    assert!(!publisher.publish_json(&registry, "unknown", &serde_json::Value::Null));
}

#[test]
fn test_malformed_header_is_protocol_error() {
    let mut socket = PubSocket::bind(
        "127.0.0.1:0".parse().expect("addr"),
        &zpubsub::TransportConfig::default(),
    )
    .expect("Failed to bind");
    let uri = format!("tcp://127.0.0.1:{}", socket.local_addr().port());

    let subscriber = Subscriber::builder()
        .session(Session::Null)
        .context(quiet_context())
        .build()
        .expect("Failed to create subscriber");
    let id = EventId::from_name("test.Malformed");
    subscriber.subscribe(id, |_| {});
    assert!(subscriber.add_connection(&uri).expect("connect"));

    // Matches the subscribed prefix but is one byte too long
    let mut header = id.to_wire().to_vec();
    header.push(0);

    for _ in 0..ROUNDS {
        socket.send(&[header.as_slice()]).expect("send");
        match subscriber.receive(Duration::from_millis(100)) {
            Err(Error::Protocol(_)) => return,
            Ok(false) => continue,
            other => panic!("unexpected receive result: {:?}", other),
        }
    }
    panic!("protocol error never surfaced");
}

#[test]
fn test_null_session_subscriber_only_uses_explicit_connections() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let subscriber = Subscriber::builder()
        .session(Session::Null)
        .context(quiet_context())
        .build()
        .expect("Failed to create subscriber");
    assert!(subscriber.session().is_none());
    assert!(subscriber.connections().is_empty());

    let id = EventId::from_name("test.Null");
    subscriber.subscribe(id, |_| {});
    subscriber
        .add_connection(&publisher.uri().to_string())
        .expect("connect");
    assert!(deliver(&mut publisher, &subscriber, id, b"x"));
}

#[test]
fn test_same_publisher_by_name_and_address_connects_once() {
    let mut publisher = publisher("tcp://127.0.0.1:0");
    let port = publisher.uri().port().expect("port");
    let subscriber = Subscriber::builder()
        .session(Session::Null)
        .context(quiet_context())
        .build()
        .expect("Failed to create subscriber");
    let id = EventId::from_name("test.Alias");
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    subscriber.subscribe(id, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });

    assert!(subscriber
        .add_connection(&format!("tcp://127.0.0.1:{}", port))
        .expect("connect"));
    assert!(!subscriber
        .add_connection(&format!("tcp://localhost:{}", port))
        .expect("connect"));
    assert_eq!(subscriber.connections().len(), 1);

    assert!(deliver(&mut publisher, &subscriber, id, b"prime"));
    // Drain anything still in flight from the priming rounds
    while subscriber
        .receive(Duration::from_millis(100))
        .expect("receive failed")
    {}

    let before = count.load(Ordering::SeqCst);
    assert!(publisher.publish(id, b"once"));
    let mut rounds = 0;
    while count.load(Ordering::SeqCst) == before {
        rounds += 1;
        assert!(rounds <= ROUNDS, "message never arrived");
        subscriber
            .receive(Duration::from_millis(100))
            .expect("receive failed");
    }
    while subscriber
        .receive(Duration::from_millis(100))
        .expect("receive failed")
    {}
    assert_eq!(count.load(Ordering::SeqCst), before + 1);
}
