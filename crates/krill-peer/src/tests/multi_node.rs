//! Multi-peer networks: convergence, placement, handoff, failure.

use std::collections::HashSet;

use bytes::Bytes;
use krill_net::{Request, Response};
use krill_ring::in_half_open;
use krill_types::{ChunkKey, FileId, NodeRef};

use super::helpers::{settle, spawn_peer, test_data, TestNet, TestPeer};

async fn network(net: &std::sync::Arc<TestNet>, ports: &[u16]) -> Vec<TestPeer> {
    let mut peers = Vec::with_capacity(ports.len());
    for &port in ports {
        let peer = spawn_peer(net, port, None).await;
        if let Some(first) = peers.first() {
            let first: &TestPeer = first;
            peer.node.join(first.node.local().addr).await.unwrap();
        }
        peers.push(peer);
        let refs: Vec<&TestPeer> = peers.iter().collect();
        settle(&refs).await;
    }
    peers
}

fn successor_cycle(peers: &[TestPeer]) -> Vec<NodeRef> {
    let start = peers[0].node.local();
    let mut cycle = vec![start];
    let mut current = peers[0].node.ring().successor();
    while current.id != start.id && cycle.len() <= peers.len() {
        cycle.push(current);
        let next = peers
            .iter()
            .find(|p| p.node.local().id == current.id)
            .expect("successor points at unknown peer");
        current = next.node.ring().successor();
    }
    cycle
}

#[tokio::test]
async fn test_sequential_joins_form_single_cycle() {
    let net = TestNet::new();
    let peers = network(&net, &[4100, 4200, 4300, 4400]).await;

    let cycle = successor_cycle(&peers);
    assert_eq!(cycle.len(), peers.len());
    let ids: HashSet<u64> = cycle.iter().map(|n| n.id.value()).collect();
    assert_eq!(ids.len(), peers.len());
}

#[tokio::test]
async fn test_replication_places_three_distinct_copies() {
    let net = TestNet::new();
    let peers = network(&net, &[4100, 4200, 4300]).await;

    let content = test_data(1000);
    let path = peers[0].source_file("tri.bin", &content);
    let outcome = peers[0].node.backup(&path, 3).await.unwrap();
    assert_eq!(outcome.chunks, 1);
    assert_eq!(outcome.copies_stored, 3);

    // Exactly one replica per copy index exists across the network.
    let mut keys: Vec<ChunkKey> = peers
        .iter()
        .flat_map(|p| p.node.store().local_records())
        .map(|r| r.key)
        .collect();
    keys.sort_by_key(|k| k.copy_index);
    let indexes: Vec<u32> = keys.iter().map(|k| k.copy_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(keys.iter().all(|k| k.file_id == outcome.file_id));

    let total: u64 = peers.iter().map(|p| p.node.store().used()).sum();
    assert_eq!(total, 3 * content.len() as u64);
}

#[tokio::test]
async fn test_restore_survives_losing_a_replica_holder() {
    let net = TestNet::new();
    let peers = network(&net, &[4100, 4200, 4300]).await;

    let content = test_data(2048);
    let path = peers[0].source_file("tough.bin", &content);
    let outcome = peers[0].node.backup(&path, 3).await.unwrap();
    assert_eq!(outcome.copies_stored, 6);

    // Take down a non-originating peer whose loss still leaves at least
    // one copy of every chunk on the survivors.
    let victim = peers[1..].iter().find(|candidate| {
        let lost: HashSet<u32> = candidate
            .node
            .store()
            .local_records()
            .iter()
            .map(|r| r.key.chunk_no)
            .collect();
        lost.iter().all(|chunk_no| {
            peers
                .iter()
                .filter(|p| p.node.local().addr != candidate.node.local().addr)
                .any(|p| {
                    p.node
                        .store()
                        .local_records()
                        .iter()
                        .any(|r| r.key.chunk_no == *chunk_no)
                })
        })
    });
    if let Some(victim) = victim {
        let victim = victim.node.local().addr;
        net.unregister(victim);
        let survivors: Vec<&TestPeer> = peers
            .iter()
            .filter(|p| p.node.local().addr != victim)
            .collect();
        settle(&survivors).await;
    }

    let dest = peers[0].node.restore(&path).await.unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), content);
}

#[tokio::test]
async fn test_join_hands_off_replicas_to_new_owner() {
    let net = TestNet::new();
    let a = spawn_peer(&net, 4100, None).await;

    let content = test_data(5000);
    let path = a.source_file("moveable.bin", &content);
    a.node.backup(&path, 1).await.unwrap();
    assert_eq!(a.node.store().used(), 5000);

    let b = spawn_peer(&net, 4200, None).await;
    b.node.join(a.node.local().addr).await.unwrap();
    settle(&[&a, &b]).await;

    // Nothing was lost in the move.
    assert_eq!(
        a.node.store().used() + b.node.store().used(),
        5000
    );

    // Every replica sits inside its holder's owned arc.
    let key_space = *a.node.ring().key_space();
    for peer in [&a, &b] {
        let snapshot = peer.node.ring().snapshot();
        let pred = snapshot.predecessor.expect("converged ring has predecessors");
        for record in peer.node.store().local_records() {
            let id = key_space.placement_id(
                &record.key.file_id,
                record.key.chunk_no,
                record.key.copy_index,
            );
            assert!(
                in_half_open(id, pred.id, snapshot.local.id),
                "replica {} sits outside its holder's arc",
                record.key
            );
        }
    }

    // And the file still restores through ring routing.
    let dest = a.node.restore(&path).await.unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), content);
}

#[tokio::test]
async fn test_handoff_keeps_chunk_when_new_owner_is_full() {
    let net = TestNet::new();
    let a = spawn_peer(&net, 4100, None).await;
    let b = spawn_peer(&net, 4200, Some(10)).await;
    let a_id = a.node.local().id;
    let b_id = b.node.local().id;

    // A replica in the joiner's arc, bigger than the joiner can hold.
    // The joiner refuses it and tries to park it on its successor,
    // which is the very node handing it off.
    let key_space = *a.node.ring().key_space();
    let moving = (0..100_000u32)
        .map(|copy| ChunkKey::new(FileId::parse("cramped").unwrap(), 1, copy))
        .find(|k| {
            let id = key_space.placement_id(&k.file_id, k.chunk_no, k.copy_index);
            !in_half_open(id, b_id, a_id)
        })
        .expect("some key hashes into the joiner's arc");
    let body = Bytes::from(test_data(64));
    let reply = a
        .node
        .dispatcher()
        .handle(Request::PutChunk {
            key: moving.clone(),
            body: body.clone(),
        })
        .await;
    assert_eq!(reply, Some(Response::Success));

    b.node.join(a.node.local().addr).await.unwrap();
    settle(&[&a, &b]).await;

    // The bounced delegation was refused, so the old owner kept the
    // bytes instead of acking a pointer at deleted data.
    assert_eq!(a.node.store().used(), 64);
    assert_eq!(b.node.store().used(), 0);
    let reply = a
        .node
        .dispatcher()
        .handle(Request::GetChunk { key: moving })
        .await;
    match reply {
        Some(Response::Chunk { body: got, .. }) => assert_eq!(got, body),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_handoff_of_parked_replica_spares_delegate_siblings() {
    let net = TestNet::new();
    let a = spawn_peer(&net, 4100, None).await;
    let d = spawn_peer(&net, 4200, None).await;
    let n = spawn_peer(&net, 4300, None).await;
    let a_id = a.node.local().id;
    let n_id = n.node.local().id;

    // A parked copy 0 sitting on the delegate, which also owns a copy 1
    // of the same chunk in its own right. Pick a chunk whose copy 0
    // moves once the new predecessor arrives.
    let key_space = *a.node.ring().key_space();
    let parked = (1..100_000u32)
        .map(|chunk_no| ChunkKey::new(FileId::parse("shared").unwrap(), chunk_no, 0))
        .find(|k| {
            let id = key_space.placement_id(&k.file_id, k.chunk_no, k.copy_index);
            !in_half_open(id, n_id, a_id)
        })
        .expect("some chunk hashes into the new predecessor's arc");
    let sibling = ChunkKey::new(parked.file_id.clone(), parked.chunk_no, 1);

    let parked_body = Bytes::from(test_data(64));
    let sibling_body = Bytes::from(test_data(96));
    d.node
        .store()
        .store_local(parked.clone(), parked_body.clone())
        .await
        .unwrap();
    d.node
        .store()
        .store_local(sibling.clone(), sibling_body)
        .await
        .unwrap();
    a.node.store().record_delegated(parked.clone(), d.node.local());

    // Adopting n moves the parked copy: bytes pulled from the delegate,
    // pushed to the new owner.
    a.node
        .dispatcher()
        .handle(Request::Notify {
            addr: n.node.local().addr,
        })
        .await;
    assert!(!a.node.store().contains(&parked));
    assert_eq!(n.node.store().used(), 64);

    // The delegate's own sibling replica must survive the move; its
    // parked copy stays too, until the backup is explicitly deleted.
    assert!(d.node.store().contains(&sibling));
    assert!(d.node.store().contains(&parked));
}

#[tokio::test]
async fn test_repeated_notify_hands_off_at_most_once() {
    let net = TestNet::new();
    let a = spawn_peer(&net, 4100, None).await;
    let b = spawn_peer(&net, 4200, None).await;
    let a_id = a.node.local().id;
    let b_id = b.node.local().id;

    // First notify adopts b as predecessor and runs the handoff.
    let reply = a
        .node
        .dispatcher()
        .handle(Request::Notify {
            addr: b.node.local().addr,
        })
        .await;
    assert_eq!(reply, None);

    // Park a replica on a that belongs in b's arc; an (incorrectly)
    // re-triggered handoff would move it.
    let key_space = *a.node.ring().key_space();
    let stray = (0..100_000u32)
        .map(|copy| ChunkKey::new(FileId::parse("stray").unwrap(), 1, copy))
        .find(|k| {
            let id = key_space.placement_id(&k.file_id, k.chunk_no, k.copy_index);
            !in_half_open(id, b_id, a_id)
        })
        .expect("some key hashes into the predecessor's arc");
    let reply = a
        .node
        .dispatcher()
        .handle(Request::PutChunk {
            key: stray.clone(),
            body: Bytes::from(test_data(64)),
        })
        .await;
    assert_eq!(reply, Some(Response::Success));

    // Same candidate again: no adoption, no second handoff.
    a.node
        .dispatcher()
        .handle(Request::Notify {
            addr: b.node.local().addr,
        })
        .await;
    assert!(a.node.store().contains(&stray));
    assert_eq!(b.node.store().used(), 0);
}
