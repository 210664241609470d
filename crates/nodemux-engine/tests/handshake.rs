mod support;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use nodemux_engine::{Disposition, EngineConfig, HandshakeState, Leader, Packet, Reply};
use nodemux_frame::control;
use nodemux_sink::{MemoryNetwork, MEMORY_SERVER};

use support::{engine_with_config, quick_config, spin, Hub, Node, RawClient, HUB, HUB_ID};

#[test]
fn peers_learn_each_others_ids() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    let conn = hub.accepted()[0];
    let accepted = hub.engine.stream(conn).unwrap();
    assert_eq!(accepted.remote_id(), 0x3333);
    assert_eq!(accepted.handshake_state(), HandshakeState::Normal);
    assert!(accepted.last_sync_received().is_some());
    assert!(accepted.last_sync_sent().is_some());
    assert_eq!(accepted.parent(), Some(hub.listener));

    let client = a.engine.stream(a.stream).unwrap();
    assert_eq!(client.remote_id(), HUB_ID);
    assert_eq!(client.handshake_state(), HandshakeState::Normal);
    assert_eq!(a.engine.stream_by_remote_id(HUB_ID), Some(a.stream));
    assert_eq!(hub.engine.stream_by_node_id(0x3333), Some(conn));
}

#[test]
fn duplicate_claim_is_flagged() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut first = Node::new(&network, 0x1234);
    let mut second = Node::new(&network, 0x1234);
    spin(&mut [&mut first.engine, &mut second.engine, &mut hub.engine], 4);

    let states: Vec<HandshakeState> = hub
        .accepted()
        .into_iter()
        .map(|h| hub.engine.stream(h).unwrap().handshake_state())
        .collect();
    assert_eq!(states.len(), 2);
    assert_eq!(
        states.iter().filter(|s| **s == HandshakeState::Normal).count(),
        1
    );
    assert_eq!(
        states.iter().filter(|s| **s == HandshakeState::Duplicate).count(),
        1
    );
}

#[test]
fn zero_id_claim_is_flagged() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut raw = RawClient::new(&network);
    raw.send(&Packet::control(0, control::SYNC, ""));
    spin(&mut [&mut raw.engine, &mut hub.engine], 4);

    let conn = hub.accepted()[0];
    let stream = hub.engine.stream(conn).unwrap();
    assert_eq!(stream.handshake_state(), HandshakeState::ZeroId);
    assert_eq!(stream.remote_id(), 0);

    let answers: Vec<Packet> = raw
        .received()
        .into_iter()
        .filter(|p| p.anchor() == control::NODEID_ZERO)
        .collect();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].leader(), Leader::Control);
    assert_eq!(answers[0].src(), HUB_ID);
}

#[test]
fn unsynchronized_traffic_is_rejected() {
    let network = MemoryNetwork::new();
    let mut engine = support::engine_with_sinks(&network);
    let listener = engine.open(MEMORY_SERVER, HUB).unwrap();
    engine.enable_protocol(listener, HUB_ID).unwrap();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    engine
        .on_accept(listener, move |engine, _, conn| {
            let counter = Rc::clone(&counter);
            engine
                .on_packet(conn, move |_, _, _| {
                    counter.set(counter.get() + 1);
                    Disposition::Finished
                })
                .unwrap();
        })
        .unwrap();

    let mut raw = RawClient::new(&network);
    let sent = [
        Packet::request(0x42, HUB_ID, "/a", "1"),
        Packet::request(0x42, HUB_ID, "/b", "2").reply("3"),
        Packet::publish("/c", "4"),
        Packet::subscribe("/d", ""),
        Packet::unsubscribe("/e", ""),
    ];
    for packet in &sent {
        raw.send(packet);
    }
    spin(&mut [&mut raw.engine, &mut engine], 4);

    assert_eq!(calls.get(), 0);
    let replies: Vec<Packet> = raw
        .received()
        .into_iter()
        .filter(|p| p.leader() == Leader::Response)
        .collect();
    assert_eq!(replies.len(), sent.len());
    for (reply, request) in replies.iter().zip(&sent) {
        assert_eq!(reply.anchor(), request.anchor());
        assert_eq!(reply.req_crc(), Some(request.crc()));
        assert_eq!(
            Reply::from_payload(reply.payload()),
            Some(Reply::not_synced())
        );
    }
}

#[test]
fn sync_is_not_repeated_within_interval() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut raw = RawClient::new(&network);
    spin(&mut [&mut raw.engine, &mut hub.engine], 8);

    let syncs: Vec<Packet> = raw
        .received()
        .into_iter()
        .filter(|p| p.leader() == Leader::Control && p.anchor() == control::SYNC)
        .collect();
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].src(), HUB_ID);
}

#[test]
fn sync_is_repeated_once_interval_passes() {
    let network = MemoryNetwork::new();
    let mut hub = engine_with_config(
        &network,
        EngineConfig {
            sync_interval: Duration::from_millis(20),
            ..quick_config()
        },
    );
    let listener = hub.open(MEMORY_SERVER, HUB).unwrap();
    hub.enable_protocol(listener, HUB_ID).unwrap();
    let mut raw = RawClient::new(&network);

    spin(&mut [&mut raw.engine, &mut hub], 3);
    let conn = hub
        .streams()
        .find(|s| s.parent() == Some(listener))
        .map(|s| s.handle())
        .unwrap();
    let first = hub.stream(conn).unwrap().last_sync_sent().unwrap();

    std::thread::sleep(Duration::from_millis(50));
    spin(&mut [&mut raw.engine, &mut hub], 3);

    let syncs: Vec<Packet> = raw
        .received()
        .into_iter()
        .filter(|p| p.leader() == Leader::Control && p.anchor() == control::SYNC)
        .collect();
    assert!(syncs.len() >= 2);
    assert!(syncs.iter().all(|p| p.src() == HUB_ID));
    assert!(hub.stream(conn).unwrap().last_sync_sent().unwrap() > first);
}
