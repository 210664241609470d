mod support;

use nodemux_engine::{Leader, Packet, Reply};
use nodemux_sink::MemoryNetwork;

use support::{spin, Hub, Node};

const TOPIC: &str = "/motor/speed";

fn acks(node: &Node) -> Vec<Reply> {
    node.take(Leader::Response)
        .iter()
        .filter_map(|p| Reply::from_payload(p.payload()))
        .collect()
}

#[test]
fn publications_reach_only_subscribers() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut s1 = Node::new(&network, 0x101);
    let mut s2 = Node::new(&network, 0x102);
    let mut s3 = Node::new(&network, 0x103);
    let mut publisher = Node::new(&network, 0x104);

    macro_rules! run {
        ($n:expr) => {
            spin(
                &mut [
                    &mut s1.engine,
                    &mut s2.engine,
                    &mut s3.engine,
                    &mut publisher.engine,
                    &mut hub.engine,
                ],
                $n,
            )
        };
    }

    run!(3);
    s1.send(&Packet::subscribe(TOPIC, ""));
    s2.send(&Packet::subscribe(TOPIC, ""));
    s3.send(&Packet::subscribe("/other", ""));
    run!(6);
    for node in [&s1, &s2, &s3] {
        assert_eq!(acks(node), vec![Reply::ok()]);
    }

    let publication = Packet::publish(TOPIC, r#"j:{"speed":12}"#);
    publisher.send(&publication);
    run!(6);

    assert_eq!(s1.take(Leader::Publish), vec![publication.clone()]);
    assert_eq!(s2.take(Leader::Publish), vec![publication.clone()]);
    assert!(s3.take(Leader::Publish).is_empty());
    assert!(publisher.take(Leader::Publish).is_empty());
    assert!(publisher.take(Leader::Response).is_empty());

    s2.send(&Packet::unsubscribe(TOPIC, ""));
    run!(6);
    assert_eq!(acks(&s2), vec![Reply::ok()]);

    publisher.send(&publication);
    run!(6);
    assert_eq!(s1.take(Leader::Publish).len(), 1);
    assert!(s2.take(Leader::Publish).is_empty());
}

#[test]
fn repeated_subscribe_is_acknowledged_without_duplicating() {
    let network = MemoryNetwork::new();
    let mut hub = Hub::new(&network);
    let mut node = Node::new(&network, 0x101);
    spin(&mut [&mut node.engine, &mut hub.engine], 3);

    node.send(&Packet::subscribe(TOPIC, ""));
    node.send(&Packet::subscribe(TOPIC, ""));
    node.send(&Packet::unsubscribe("/never", ""));
    spin(&mut [&mut node.engine, &mut hub.engine], 6);

    assert_eq!(acks(&node), vec![Reply::ok(); 3]);
    let conn = hub.accepted()[0];
    let topics: Vec<&str> = hub.engine.stream(conn).unwrap().subscriptions().collect();
    assert_eq!(topics, vec![TOPIC]);
}
