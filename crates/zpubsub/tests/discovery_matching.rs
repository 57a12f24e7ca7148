// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery-driven connection tests over an in-process registry.
//!
//! Each "machine" is a separate `Context` with its own identity sharing one
//! `LocalDiscovery`, so self-suppression and session matching can be
//! exercised inside a single test process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zpubsub::discovery::keys;
use zpubsub::{
    Context, Discovery, EventId, LocalDiscovery, ProcessIdentity, Publisher, Session,
    SessionPolicy, Subscriber, Timeout, TransportConfig,
};

const ROUNDS: usize = 10;

fn machine(registry: &LocalDiscovery) -> Arc<Context> {
    Context::builder()
        .identity(ProcessIdentity::new())
        .discovery(Arc::new(registry.clone()))
        .build()
}

fn publisher_in(context: Arc<Context>, session: &str) -> Publisher {
    Publisher::builder()
        .uri("tcp://127.0.0.1:0")
        .session(session)
        .context(context)
        .build()
        .expect("Failed to create publisher")
}

fn subscriber_in(context: Arc<Context>, session: &str) -> Subscriber {
    Subscriber::builder()
        .session(session)
        .context(context)
        .build()
        .expect("Failed to create subscriber")
}

fn counting(subscriber: &Subscriber, id: EventId) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    subscriber.subscribe(id, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

fn deliver(publisher: &mut Publisher, subscriber: &Subscriber, id: EventId) -> bool {
    for _ in 0..ROUNDS {
        publisher.publish(id, b"payload");
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
fn test_same_session_connects() {
    let registry = LocalDiscovery::new();
    let mut publisher = publisher_in(machine(&registry), "s1");
    let subscriber = subscriber_in(machine(&registry), "s1");
    assert_eq!(subscriber.connections(), vec![publisher.uri().to_string()]);

    let id = EventId::from_name("test.Session");
    let count = counting(&subscriber, id);
    assert!(deliver(&mut publisher, &subscriber, id));
    assert!(count.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_different_session_is_ignored() {
    let registry = LocalDiscovery::new();
    let mut publisher = publisher_in(machine(&registry), "s1");
    let subscriber = subscriber_in(machine(&registry), "s2");
    assert!(subscriber.connections().is_empty());

    let id = EventId::from_name("test.Session");
    let count = counting(&subscriber, id);
    assert!(!deliver(&mut publisher, &subscriber, id));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_session_key_matches_any() {
    let registry = LocalDiscovery::new();
    let mut publisher = Publisher::builder()
        .uri("tcp://127.0.0.1:0")
        .session(Session::Null)
        .context(machine(&registry))
        .build()
        .expect("Failed to create publisher");
    let port = publisher.uri().port().expect("port").to_string();
    let foreign_id = ProcessIdentity::new().to_string();
    registry.announce_raw(
        zpubsub::config::SERVICE_TYPE,
        "foreign",
        &[
            (keys::ID, foreign_id.as_str()),
            (keys::HOST, "127.0.0.1"),
            (keys::PORT, port.as_str()),
        ],
    );

    let subscriber = subscriber_in(machine(&registry), "s1");
    assert_eq!(subscriber.connections().len(), 1);
    let id = EventId::from_name("test.Missing");
    counting(&subscriber, id);
    assert!(deliver(&mut publisher, &subscriber, id));

    let strict = Context::builder()
        .identity(ProcessIdentity::new())
        .discovery(Arc::new(registry.clone()))
        .session_policy(SessionPolicy::Strict)
        .build();
    let strict_subscriber = subscriber_in(strict, "s1");
    assert!(strict_subscriber.connections().is_empty());
}

#[test]
fn test_self_suppression() {
    let registry = LocalDiscovery::new();
    let context = machine(&registry);
    let mut publisher = publisher_in(Arc::clone(&context), "s1");
    let subscriber = subscriber_in(Arc::clone(&context), "s1");
    subscriber.update();
    assert!(subscriber.connections().is_empty());

    let id = EventId::from_name("test.Self");
    let count = counting(&subscriber, id);
    assert!(!deliver(&mut publisher, &subscriber, id));
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // An explicit endpoint in the same process is still honoured
    let explicit = Subscriber::builder()
        .uri(&publisher.uri().to_string())
        .context(context)
        .build()
        .expect("Failed to create subscriber");
    counting(&explicit, id);
    assert!(deliver(&mut publisher, &explicit, id));
}

#[test]
fn test_publisher_discovered_after_subscriber() {
    let registry = LocalDiscovery::new();
    let subscriber = subscriber_in(machine(&registry), "late");
    assert!(subscriber.connections().is_empty());
    let id = EventId::from_name("test.Late");
    counting(&subscriber, id);

    let mut publisher = publisher_in(machine(&registry), "late");
    assert!(deliver(&mut publisher, &subscriber, id));
    assert_eq!(subscriber.connections(), vec![publisher.uri().to_string()]);
}

#[test]
fn test_indefinite_receive_waits_for_late_publisher() {
    let registry = LocalDiscovery::new();
    let subscriber = subscriber_in(machine(&registry), "late");
    let id = EventId::from_name("test.Indefinite");
    let count = counting(&subscriber, id);

    let stop = Arc::new(AtomicBool::new(false));
    let publisher_thread = {
        let context = machine(&registry);
        let stop = Arc::clone(&stop);
        thread::Builder::new()
            .name("late-publisher".to_string())
            .spawn(move || {
                thread::sleep(Duration::from_millis(300));
                let mut publisher = publisher_in(context, "late");
                while !stop.load(Ordering::SeqCst) {
                    publisher.publish(id, b"finally");
                    thread::sleep(Duration::from_millis(20));
                }
            })
            .expect("Failed to spawn publisher thread")
    };

    let start = Instant::now();
    let delivered = subscriber
        .receive(Timeout::Indefinite)
        .expect("receive failed");
    stop.store(true, Ordering::SeqCst);
    publisher_thread.join().expect("publisher thread panicked");

    assert!(delivered);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(count.load(Ordering::SeqCst) >= 1);
    assert_eq!(subscriber.connections().len(), 1);
}

#[test]
fn test_reconnect_does_not_duplicate_endpoint() {
    let registry = LocalDiscovery::new();
    let publisher = publisher_in(machine(&registry), "s1");
    let context = Context::builder()
        .identity(ProcessIdentity::new())
        .discovery(Arc::new(registry.clone()))
        .transport(TransportConfig::default().with_reconnect_interval(Duration::from_millis(10)))
        .build();
    let subscriber = subscriber_in(context, "s1");
    assert_eq!(subscriber.connections().len(), 1);

    for _ in 0..3 {
        subscriber.update();
        subscriber
            .receive(Duration::from_millis(20))
            .expect("receive failed");
    }
    assert_eq!(subscriber.connections().len(), 1);
    drop(publisher);
    assert!(registry.browse(zpubsub::config::SERVICE_TYPE).expect("browse").is_empty());
}
