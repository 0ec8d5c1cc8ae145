//! Integration tests for the gossip broadcaster.
//!
//! These tests validate the broadcast contract end to end at the queue level:
//! saturation of a group, dedup across repeated floods, fan-out on accept,
//! cancellation, and convergence when several nodes relay each other's
//! floods.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use meshwire::broadcast::{Broadcaster, BroadcasterConfig};
use meshwire::dht::{Dht, PeerDirectory};
use meshwire::error::{Error, QueueError};
use meshwire::event::{event_queue, Event, EventReceiver};
use meshwire::message::{message_queue, MessageReceiver, Variant, Version};
use meshwire::peer::{GroupID, PeerAddress, PeerID};

fn make_id(seed: u8) -> PeerID {
    PeerID::from_bytes([seed; 32])
}

fn make_addr(seed: u8) -> PeerAddress {
    PeerAddress::new(
        make_id(seed),
        format!("127.0.0.1:{}", 42000 + seed as u16).parse().unwrap(),
        1,
    )
}

fn group() -> GroupID {
    GroupID::from_bytes([0xA7u8; 32])
}

struct Node {
    broadcaster: Broadcaster<Dht>,
    outbound: MessageReceiver,
    events: EventReceiver,
}

/// A node whose directory knows `peers` and one group holding `members`.
fn make_node(me: u8, peers: &[u8], members: &[u8], num_workers: usize) -> Node {
    let bootstrap: Vec<_> = peers.iter().map(|s| make_addr(*s)).collect();
    let dht = Dht::new(make_addr(me), None, bootstrap).unwrap();
    dht.add_group(group(), members.iter().map(|s| make_id(*s)).collect())
        .unwrap();

    let (msg_tx, msg_rx) = message_queue(256);
    let (evt_tx, evt_rx) = event_queue(256);
    let config = BroadcasterConfig {
        num_workers,
        ..BroadcasterConfig::default()
    };
    Node {
        broadcaster: Broadcaster::new(config, dht, msg_tx, evt_tx),
        outbound: msg_rx,
        events: evt_rx,
    }
}

fn drain(rx: &mut MessageReceiver) -> Vec<meshwire::message::MessageOnTheWire> {
    let mut out = Vec::new();
    while let Ok(wire) = rx.try_recv() {
        out.push(wire);
    }
    out
}

#[tokio::test]
async fn broadcast_saturates_the_group() {
    let mut node = make_node(0, &[1, 2, 3, 4], &[1, 2, 3, 4], 8);
    let ctx = CancellationToken::new();

    node.broadcaster
        .broadcast(&ctx, group(), vec![0x01, 0x02])
        .await
        .unwrap();

    let wires = drain(&mut node.outbound);
    assert_eq!(wires.len(), 4);

    let targets: HashSet<_> = wires.iter().map(|w| w.to.unwrap()).collect();
    let expected: HashSet<_> = (1..=4).map(|s| make_addr(s).addr).collect();
    assert_eq!(targets, expected);

    for wire in &wires {
        assert_eq!(wire.message.version, Version::V1);
        assert_eq!(wire.message.variant, Variant::Broadcast);
        assert_eq!(wire.message.group_id, group());
        assert_eq!(wire.message.body, vec![0x01, 0x02]);
    }
}

#[tokio::test]
async fn repeated_broadcast_is_suppressed() {
    let mut node = make_node(0, &[1, 2, 3, 4], &[1, 2, 3, 4], 8);
    let ctx = CancellationToken::new();

    node.broadcaster
        .broadcast(&ctx, group(), vec![0x01, 0x02])
        .await
        .unwrap();
    node.broadcaster
        .broadcast(&ctx, group(), vec![0x01, 0x02])
        .await
        .unwrap();

    assert_eq!(drain(&mut node.outbound).len(), 4);
}

#[tokio::test]
async fn accepted_broadcast_delivers_once_and_fans_out() {
    let mut node = make_node(0, &[1, 2, 3], &[1, 2, 3], 8);
    let ctx = CancellationToken::new();

    let from = make_id(0xAF);
    let message = meshwire::message::Message::broadcast(group(), vec![0xFF]);
    node.broadcaster
        .accept_broadcast(&ctx, from, message)
        .await
        .unwrap();

    match node.events.recv().await.unwrap() {
        Event::MessageReceived { body, from: f, .. } => {
            assert_eq!(body, vec![0xFF]);
            assert_eq!(f, Some(from));
        }
        other => panic!("expected MessageReceived, got {other:?}"),
    }
    assert!(node.events.try_recv().is_err());

    assert_eq!(drain(&mut node.outbound).len(), 3);
}

#[tokio::test]
async fn cancelled_broadcast_returns_typed_error() {
    let mut node = make_node(0, &[1, 2, 3, 4], &[1, 2, 3, 4], 8);
    let ctx = CancellationToken::new();
    ctx.cancel();

    match node.broadcaster.broadcast(&ctx, group(), vec![0x09]).await {
        Err(Error::Broadcasting { group: g, source }) => {
            assert_eq!(g, group());
            assert_eq!(source, QueueError::Cancelled);
        }
        other => panic!("expected Broadcasting error, got {other:?}"),
    }
    assert!(drain(&mut node.outbound).is_empty());
}

/// Three nodes relay each other's floods by hand: every reachable node
/// delivers the body exactly once, and the flood terminates.
#[tokio::test]
async fn flood_converges_across_relaying_nodes() {
    // Each node knows the other two; the group names all three.
    let mut nodes = vec![
        make_node(1, &[2, 3], &[1, 2, 3], 4),
        make_node(2, &[1, 3], &[1, 2, 3], 4),
        make_node(3, &[1, 2], &[1, 2, 3], 4),
    ];
    let ctx = CancellationToken::new();

    nodes[0]
        .broadcaster
        .broadcast(&ctx, group(), vec![0xBE, 0xEF])
        .await
        .unwrap();

    // Deliver queued frames to their targets until the overlay quiesces.
    let addr_of = |seed: u8| make_addr(seed).addr;
    let mut hops = 0;
    loop {
        let mut delivered = false;
        for origin in 0..nodes.len() {
            let wires = drain(&mut nodes[origin].outbound);
            let origin_id = make_id(origin as u8 + 1);
            for wire in wires {
                let to = wire.to.unwrap();
                let target = (1..=3u8)
                    .position(|s| addr_of(s) == to)
                    .expect("target is one of the nodes");
                nodes[target]
                    .broadcaster
                    .accept_broadcast(&ctx, origin_id, wire.message)
                    .await
                    .unwrap();
                delivered = true;
            }
        }
        if !delivered {
            break;
        }
        hops += 1;
        assert!(hops < 16, "flood failed to terminate");
    }

    // The originator's own flood is suppressed by its dedup store; the other
    // two nodes deliver exactly once each.
    let mut deliveries = Vec::new();
    for node in nodes.iter_mut() {
        let mut count = 0;
        while let Ok(event) = node.events.try_recv() {
            if matches!(event, Event::MessageReceived { .. }) {
                count += 1;
            }
        }
        deliveries.push(count);
    }
    assert_eq!(deliveries, vec![0, 1, 1]);
}
