mod common;

use astichat::protocol::ClientEvent;
use astichat::transport::{
    Transport, EVENT_PEER_CONNECT, EVENT_PEER_CONNECTED, EVENT_PEER_DISCONNECTED, EVENT_PEER_JOINED,
    EVENT_PEER_TYPED,
};
use astichat::{Body, Error, MESSAGE_CONNECT, MESSAGE_DISCONNECT};
use chrono::Duration;
use common::*;

#[tokio::test]
async fn first_peer_gets_an_empty_roster() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    let mut alice = world.client("alice", alice_keys(), 5001);

    assert_eq!(world.server.pool().len(), 0);
    alice.protocol.connect().await.unwrap();

    assert_eq!(world.server.pool().len(), 1);
    let registered = world.server.pool().get("alice").unwrap();
    assert_eq!(registered.addr, alice.addr);
    assert_eq!(registered.public_key, alice_keys().public);
    assert_eq!(alice.next_event(), Some(ClientEvent::Connected(vec![])));
    assert!(world.network.take_failures().is_empty());
}

#[tokio::test]
async fn arrivals_are_announced_both_ways() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    world.provision("bob", bob_keys()).await;
    let mut alice = world.client("alice", alice_keys(), 5001);
    let mut bob = world.client("bob", bob_keys(), 5002);

    alice.protocol.connect().await.unwrap();
    alice.next_event();
    bob.protocol.connect().await.unwrap();

    let alice_record = world.server.pool().get("alice").unwrap();
    let bob_record = world.server.pool().get("bob").unwrap();
    assert_eq!(bob.next_event(), Some(ClientEvent::Connected(vec![alice_record.clone()])));
    assert_eq!(alice.next_event(), Some(ClientEvent::Joined(bob_record.clone())));
    assert_eq!(alice.protocol.pool().get("bob"), Some(bob_record));
    assert_eq!(bob.protocol.pool().get("alice"), Some(alice_record));
    assert!(world.network.take_failures().is_empty());
}

#[tokio::test]
async fn departures_are_broadcast() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    world.provision("bob", bob_keys()).await;
    let mut alice = world.client("alice", alice_keys(), 5001);
    let mut bob = world.client("bob", bob_keys(), 5002);
    alice.protocol.connect().await.unwrap();
    bob.protocol.connect().await.unwrap();
    let alice_record = world.server.pool().get("alice").unwrap();
    while bob.next_event().is_some() {}
    while alice.next_event().is_some() {}

    alice.protocol.disconnect().await.unwrap();

    assert!(world.server.pool().get("alice").is_none());
    assert_eq!(world.server.pool().len(), 1);
    assert_eq!(bob.next_event(), Some(ClientEvent::Left(alice_record)));
    assert!(bob.protocol.pool().get("alice").is_none());
    assert_eq!(alice.next_event(), None);

    // A second disconnect is a no-op.
    alice.protocol.disconnect().await.unwrap();
    assert_eq!(bob.next_event(), None);
    assert!(world.network.take_failures().is_empty());
}

#[tokio::test]
async fn typed_lines_travel_peer_to_peer() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    world.provision("bob", bob_keys()).await;
    let mut alice = world.client("alice", alice_keys(), 5001);
    let mut bob = world.client("bob", bob_keys(), 5002);
    alice.protocol.connect().await.unwrap();
    bob.protocol.connect().await.unwrap();
    while bob.next_event().is_some() {}
    while alice.next_event().is_some() {}

    world.clock.advance(2);
    assert_eq!(alice.protocol.type_line("hello bob").await.unwrap(), 1);

    assert_eq!(
        bob.next_event(),
        Some(ClientEvent::Typed {
            from: "alice".into(),
            message: "hello bob".into(),
        })
    );
    assert_eq!(world.network.sent(EVENT_PEER_TYPED), vec![(alice.addr, bob.addr)]);
    assert_eq!(alice.next_event(), None);
}

#[tokio::test]
async fn lines_from_unknown_peers_are_dropped() {
    let world = World::new();
    world.provision("bob", bob_keys()).await;
    let mut bob = world.client("bob", bob_keys(), 5002);
    bob.protocol.connect().await.unwrap();
    bob.next_event();

    let stranger = world.network.transport(addr(6666));
    let body = Body::new(b"psst", world.clock.get(), "mallory", &bob_keys().public).unwrap();
    stranger
        .write(EVENT_PEER_TYPED, serde_json::to_value(&body).unwrap(), bob.addr)
        .await
        .unwrap();

    assert_eq!(bob.next_event(), None);
    assert!(world.network.take_failures().is_empty());
}

#[tokio::test]
async fn stale_connect_is_rejected() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    let alice = world.client("alice", alice_keys(), 5001);

    let body = Body::new(
        MESSAGE_CONNECT,
        world.clock.get() - Duration::seconds(6),
        "alice",
        &server_keys().public,
    )
    .unwrap();
    world
        .network
        .transport(alice.addr)
        .write(EVENT_PEER_CONNECT, serde_json::to_value(&body).unwrap(), world.server_addr)
        .await
        .unwrap();

    assert!(world.server.pool().is_empty());
    let failures = world.network.take_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, Error::Stale { .. }));
}

#[tokio::test]
async fn connect_must_carry_the_connect_marker() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    let alice = world.client("alice", alice_keys(), 5001);

    let body = Body::new(MESSAGE_DISCONNECT, world.clock.get(), "alice", &server_keys().public).unwrap();
    world
        .network
        .transport(alice.addr)
        .write(EVENT_PEER_CONNECT, serde_json::to_value(&body).unwrap(), world.server_addr)
        .await
        .unwrap();

    assert!(world.server.pool().is_empty());
    let failures = world.network.take_failures();
    assert!(matches!(failures[0].1, Error::MarkerMismatch { .. }));
}

#[tokio::test]
async fn impostor_without_the_server_key_is_rejected() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;

    // Sealed for a key that is not alice's server key.
    let body = Body::new(MESSAGE_CONNECT, world.clock.get(), "alice", &eve_keys().public).unwrap();
    world
        .network
        .transport(addr(6666))
        .write(EVENT_PEER_CONNECT, serde_json::to_value(&body).unwrap(), world.server_addr)
        .await
        .unwrap();

    assert!(world.server.pool().is_empty());
    assert!(world.network.sent(EVENT_PEER_CONNECTED).is_empty());
    let failures = world.network.take_failures();
    assert!(matches!(failures[0].1, Error::Decryption(_)));
}

#[tokio::test]
async fn unknown_account_is_rejected() {
    let world = World::new();
    let mut ghost = world.client("ghost", alice_keys(), 5009);
    ghost.protocol.connect().await.unwrap();

    assert!(world.server.pool().is_empty());
    assert_eq!(ghost.next_event(), None);
    let failures = world.network.take_failures();
    assert!(matches!(failures[0].1, Error::NotFound(_)));
}

#[tokio::test]
async fn reconnect_keeps_the_first_address() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    let mut first = world.client("alice", alice_keys(), 5001);
    let mut second = world.client("alice", alice_keys(), 5011);

    first.protocol.connect().await.unwrap();
    first.next_event();
    second.protocol.connect().await.unwrap();

    assert_eq!(world.server.pool().get("alice").unwrap().addr, first.addr);
    assert_eq!(first.next_event(), Some(ClientEvent::Connected(vec![])));
    assert_eq!(second.next_event(), None);
}

#[tokio::test]
async fn error_bodies_surface_as_events() {
    let world = World::new();
    let mut alice = world.client("alice", alice_keys(), 5001);

    world
        .network
        .transport(world.server_addr)
        .write(
            EVENT_PEER_JOINED,
            serde_json::to_value(Body::error("boom")).unwrap(),
            alice.addr,
        )
        .await
        .unwrap();

    assert_eq!(alice.next_event(), Some(ClientEvent::RemoteError("boom".into())));
    assert!(alice.protocol.pool().is_empty());
}

#[tokio::test]
async fn one_unreachable_peer_does_not_stop_the_fan_out() {
    let world = World::new();
    world.provision("alice", alice_keys()).await;
    world.provision("bob", bob_keys()).await;
    world.provision("carol", eve_keys()).await;
    let alice = world.client("alice", alice_keys(), 5001);
    let mut bob = world.client("bob", bob_keys(), 5002);
    let mut carol = world.client("carol", eve_keys(), 5003);
    alice.protocol.connect().await.unwrap();
    bob.protocol.connect().await.unwrap();
    while bob.next_event().is_some() {}

    world.network.cut(alice.addr);
    carol.protocol.connect().await.unwrap();

    let carol_record = world.server.pool().get("carol").unwrap();
    assert_eq!(bob.next_event(), Some(ClientEvent::Joined(carol_record.clone())));
    match carol.next_event() {
        Some(ClientEvent::Connected(peers)) => {
            let names: Vec<&str> = peers.iter().map(|p| p.username.as_str()).collect();
            assert_eq!(names, ["alice", "bob"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    let joined: Vec<_> = world
        .network
        .sent(EVENT_PEER_JOINED)
        .into_iter()
        .filter(|(_, to)| *to != alice.addr)
        .collect();
    assert!(joined.contains(&(world.server_addr, bob.addr)));
    assert!(world
        .network
        .sent(EVENT_PEER_CONNECTED)
        .contains(&(world.server_addr, carol.addr)));

    carol.protocol.disconnect().await.unwrap();
    assert_eq!(bob.next_event(), Some(ClientEvent::Left(carol_record)));
    let departed = world.network.sent(EVENT_PEER_DISCONNECTED);
    assert_eq!(departed, vec![(world.server_addr, bob.addr)]);
    assert!(world.network.take_failures().is_empty());
}
