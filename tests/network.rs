//! End to end tests over real localhost UDP sockets.

use std::{
    net::{IpAddr, SocketAddr, UdpSocket},
    thread,
    time::Duration,
};

use kadnode::{messages::Message, Dht, Error, FindValue, Id, Testnet, MAX_BUCKET_SIZE_K};

fn localhost() -> Dht {
    Dht::builder()
        .bind_address(IpAddr::from([127, 0, 0, 1]))
        .port(0)
        .request_timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

#[test]
fn testnet_bootstraps_to_first_node() {
    let testnet = Testnet::new(6).unwrap();
    thread::sleep(Duration::from_millis(50));

    let first = &testnet.nodes[0];

    assert_eq!(first.routing_table().size(), 5);
    for node in &testnet.nodes[1..] {
        assert_eq!(node.routing_table().to_owned_nodes().len(), 1);
        assert!(node.routing_table().contains(&first.id()));
    }
}

#[test]
fn find_node_returns_known_nodes_by_distance() {
    let testnet = Testnet::new(12).unwrap();
    thread::sleep(Duration::from_millis(50));

    let client = localhost();
    let target = Id::random();

    let nodes = client.find_node(testnet.nodes[0].local_addr(), target).unwrap();

    assert!(!nodes.is_empty());
    assert!(nodes.len() <= MAX_BUCKET_SIZE_K);
    assert!(nodes
        .windows(2)
        .all(|pair| pair[0].id.xor(&target) <= pair[1].id.xor(&target)));

    let known: Vec<Id> = testnet.nodes[1..].iter().map(|node| node.id()).collect();
    for node in &nodes {
        assert!(known.contains(&node.id));
    }
}

#[test]
fn find_node_on_empty_table_gets_no_answer() {
    let lonely = localhost();
    let client = localhost();

    assert!(matches!(
        client.find_node(lonely.local_addr(), Id::random()),
        Err(Error::Timeout(_))
    ));

    // The request was still valid, so the lonely node learned the client.
    assert!(lonely.routing_table().contains(&client.id()));
}

#[test]
fn store_then_find_value() {
    let testnet = Testnet::new(4).unwrap();

    let server = &testnet.nodes[0];
    let holder = &testnet.nodes[1];
    let seeker = &testnet.nodes[2];

    let key = Id::random();

    holder.store(server.local_addr(), key, 7777).unwrap();

    let stored = server.holders(&key);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, holder.id());
    assert_eq!(
        stored[0].address,
        SocketAddr::new(holder.local_addr().ip(), 7777)
    );

    match seeker.find_value(server.local_addr(), key).unwrap() {
        FindValue::Found(holders) => assert_eq!(holders, stored),
        other => panic!("expected holders, got {other:?}"),
    }

    match seeker.find_value(server.local_addr(), Id::random()).unwrap() {
        FindValue::Closest(nodes) => assert!(!nodes.is_empty()),
        other => panic!("expected closest nodes, got {other:?}"),
    }
}

#[test]
fn repeated_store_replaces_holder() {
    let server = localhost();
    let holder = localhost();

    let key = Id::random();

    holder.store(server.local_addr(), key, 1000).unwrap();
    holder.store(server.local_addr(), key, 2000).unwrap();

    let stored = server.holders(&key);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].address.port(), 2000);
}

#[test]
fn garbage_gets_no_answer() {
    let node = localhost();

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();

    socket.send_to(b"definitely not bencode", node.local_addr()).unwrap();
    socket.send_to(b"d1:0i42ee", node.local_addr()).unwrap();

    let mut buf = [0u8; 1024];
    assert!(socket.recv_from(&mut buf).is_err());
    assert!(node.routing_table().is_empty());
}

#[test]
fn raw_ping_is_answered() {
    let node = localhost();

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let transaction_id = Id::random();
    let sender_id = Id::random();

    let mut ping = b"d1:0i0e1:148:".to_vec();
    ping.extend(transaction_id.as_bytes());
    ping.extend(b"1:248:");
    ping.extend(sender_id.as_bytes());
    ping.extend(b"1:34:ping1:4lee");

    socket.send_to(&ping, node.local_addr()).unwrap();

    let mut buf = [0u8; 1024];
    let (amt, from) = socket.recv_from(&mut buf).unwrap();

    assert_eq!(from, node.local_addr());

    let reply = Message::from_bytes(&buf[..amt]).unwrap();
    assert_eq!(reply.transaction_id, transaction_id);
    assert_eq!(reply.sender_id, node.id());
}

#[test]
fn many_concurrent_pings() {
    let server = Dht::builder()
        .bind_address(IpAddr::from([127, 0, 0, 1]))
        .port(0)
        .workers(8)
        .build()
        .unwrap();

    let clients: Vec<Dht> = (0..8).map(|_| localhost()).collect();
    let address = server.local_addr();
    let server_id = server.id();

    let handles: Vec<_> = clients
        .iter()
        .cloned()
        .map(|client| {
            thread::spawn(move || {
                for _ in 0..10 {
                    assert_eq!(client.ping(address).unwrap(), server_id);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    thread::sleep(Duration::from_millis(50));
    for client in &clients {
        assert_eq!(client.rpc().pending_transactions(), 0);
        assert!(server.routing_table().contains(&client.id()));
    }
}
