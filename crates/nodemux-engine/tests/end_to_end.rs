mod support;

use std::cell::Cell;
use std::rc::Rc;

use nodemux_engine::{Disposition, Leader, Packet, Reply};
use nodemux_sink::{MemoryNetwork, MEMORY_SERVER};

use support::{spin, Hub, Node, HUB_ID};

#[test]
fn echo_request_round_trip() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    let request = Packet::request(0x3333, HUB_ID, "/echo", "hello");
    a.send(&request);
    spin(&mut [&mut a.engine, &mut hub.engine], 6);

    let seen = hub.local.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload().as_ref(), b"hello");

    let responses = a.take(Leader::Response);
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.src(), HUB_ID);
    assert_eq!(response.dst(), 0x3333);
    assert_eq!(response.anchor(), "/echo");
    assert_eq!(response.payload().as_ref(), b"world");
    assert_eq!(response.req_crc(), Some(request.crc()));
}

#[test]
fn large_payloads_survive_fragmentation() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    let body: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
    a.send(&Packet::request(0x3333, HUB_ID, "/bulk", body.clone()));
    spin(&mut [&mut a.engine, &mut hub.engine], 6);

    let seen = hub.local.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].payload().as_ref(), body.as_slice());
}

#[test]
fn request_is_forwarded_between_nodes() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x1111);
    let mut b = Node::new(&network, 0x2222);
    spin(&mut [&mut a.engine, &mut b.engine, &mut hub.engine], 3);

    let request = Packet::request(0x1111, 0x2222, "/ping", "ping");
    a.send(&request);
    spin(&mut [&mut a.engine, &mut b.engine, &mut hub.engine], 6);

    let delivered = b.take(Leader::Request);
    assert_eq!(delivered, vec![request.clone()]);

    b.send(&delivered[0].reply("pong"));
    spin(&mut [&mut a.engine, &mut b.engine, &mut hub.engine], 6);

    let responses = a.take(Leader::Response);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].src(), 0x2222);
    assert_eq!(responses[0].payload().as_ref(), b"pong");
    assert_eq!(responses[0].req_crc(), Some(request.crc()));
    assert!(hub.local.borrow().is_empty());
}

#[test]
fn unknown_destination_gets_not_found() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    a.send(&Packet::request(0x3333, 0x9999, "/nowhere", "x"));
    spin(&mut [&mut a.engine, &mut hub.engine], 6);

    let responses = a.take(Leader::Response);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].src(), 0x9999);
    assert_eq!(responses[0].anchor(), "/nowhere");
    assert_eq!(
        Reply::from_payload(responses[0].payload()),
        Some(Reply::not_found())
    );
}

#[test]
fn local_node_without_handler_gets_internal_error() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::with_handler(&network, false);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    a.send(&Packet::request(0x3333, HUB_ID, "/echo", "hello"));
    spin(&mut [&mut a.engine, &mut hub.engine], 6);

    let responses = a.take(Leader::Response);
    assert_eq!(responses.len(), 1);
    assert_eq!(
        Reply::from_payload(responses[0].payload()),
        Some(Reply::internal())
    );
}

#[test]
fn stream_without_handler_gets_internal_error() {
    let network = MemoryNetwork::new();
    let mut engine = support::engine_with_sinks(&network);
    let listener = engine.open(MEMORY_SERVER, support::HUB).unwrap();
    engine.enable_protocol(listener, HUB_ID).unwrap();
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut engine], 3);

    a.send(&Packet::request(0x3333, HUB_ID, "/echo", "hello"));
    spin(&mut [&mut a.engine, &mut engine], 6);

    let responses = a.take(Leader::Response);
    assert_eq!(responses.len(), 1);
    assert_eq!(
        Reply::from_payload(responses[0].payload()).map(|r| r.err),
        Some(Reply::INTERNAL)
    );
}

#[test]
fn local_match_wins_over_remote_match() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut shadow = Node::new(&network, 0x7777);
    let mut a = Node::new(&network, 0x2222);
    spin(&mut [&mut shadow.engine, &mut a.engine, &mut hub.engine], 3);

    // A second listener on the hub claims the same id the shadow node synced with.
    let second = hub.engine.open(MEMORY_SERVER, "hub-2").unwrap();
    hub.engine.enable_protocol(second, 0x7777).unwrap();
    let hits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&hits);
    hub.engine
        .on_packet(second, move |_, _, _| {
            counter.set(counter.get() + 1);
            Disposition::Finished
        })
        .unwrap();

    a.send(&Packet::request(0x2222, 0x7777, "/who", "?"));
    spin(&mut [&mut shadow.engine, &mut a.engine, &mut hub.engine], 6);

    assert_eq!(hits.get(), 1);
    assert!(shadow.take(Leader::Request).is_empty());
}

#[test]
fn junk_before_a_request_is_skipped() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut a = Node::new(&network, 0x3333);
    spin(&mut [&mut a.engine, &mut hub.engine], 3);

    a.engine.send_to_buffer(a.stream, b"junk").unwrap();
    a.send(&Packet::request(0x3333, HUB_ID, "/echo", "hello"));
    spin(&mut [&mut a.engine, &mut hub.engine], 6);

    assert_eq!(hub.local.borrow().len(), 1);
    let conn = hub.accepted()[0];
    assert_eq!(hub.engine.stream(conn).unwrap().discarded(), 4);
    assert_eq!(a.take(Leader::Response).len(), 1);
}
