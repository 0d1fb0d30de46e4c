use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cubeconnect::net::{
    self, ConnectError, Connection, Delivery, Event, NetworkContext, PacketLossSimulation,
    PeerState, Role, SendError, Session, SessionConfig,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

fn context() -> NetworkContext {
    net::initialize().unwrap()
}

fn bind(context: &NetworkContext, role: Role, max_peers: usize, config: SessionConfig) -> Session {
    Session::bind(context, (Ipv4Addr::LOCALHOST, 0), role, max_peers, config).unwrap()
}

fn lossy(rate: f32) -> SessionConfig {
    SessionConfig {
        packet_loss: Some(PacketLossSimulation::new(rate)),
        ..Default::default()
    }
}

/// Polls the server on its own thread until `stop` is raised, so that a
/// blocking `connect` on the test thread has someone to talk to.
fn serve(mut server: Session, stop: Arc<AtomicBool>) -> JoinHandle<(Session, Vec<Event>)> {
    thread::spawn(move || {
        let mut events = Vec::new();
        while !stop.load(Ordering::SeqCst) {
            events.extend(server.poll(Duration::from_millis(5)).unwrap());
        }
        (server, events)
    })
}

fn connected_pair(server_config: SessionConfig, client_config: SessionConfig) -> Pair {
    let context = context();
    let server = bind(&context, Role::Server, 4, server_config);
    let server_addr = server.local_addr();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = serve(server, Arc::clone(&stop));

    let mut client = bind(&context, Role::Client, 1, client_config);
    let to_server = client.connect(server_addr, CONNECT_TIMEOUT).unwrap();

    stop.store(true, Ordering::SeqCst);
    let (server, events) = handle.join().unwrap();

    let to_client = events
        .iter()
        .find_map(|e| match e {
            Event::Connect(connection) => Some(*connection),
            _ => None,
        })
        .expect("server never raised a connect event");

    Pair {
        server,
        client,
        to_server,
        to_client,
    }
}

struct Pair {
    server: Session,
    client: Session,
    to_server: Connection,
    to_client: Connection,
}

/// Pumps both sessions until `done` holds for the receiver's events.
fn exchange(
    receiver: &mut Session,
    sender: &mut Session,
    done: impl Fn(&[Event]) -> bool,
) -> Vec<Event> {
    let deadline = Instant::now() + EXCHANGE_TIMEOUT;
    let mut events = Vec::new();
    while !done(&events) && Instant::now() < deadline {
        sender.poll(Duration::from_millis(1)).unwrap();
        events.extend(receiver.poll(Duration::from_millis(5)).unwrap());
    }
    events
}

fn payloads(events: &[Event], channel: u8) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Receive {
                channel: c,
                payload,
                ..
            } if *c == channel => Some(payload.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_handshake_connects_both_ends() {
    let pair = connected_pair(SessionConfig::default(), SessionConfig::default());

    assert_eq!(
        pair.client.peer_state(pair.to_server),
        Some(PeerState::Connected)
    );
    assert_eq!(pair.server.connected_count(), 1);
    assert_eq!(pair.server.connections(), vec![pair.to_client]);
    assert_eq!(
        pair.server.peer_addr(pair.to_client),
        Some(pair.client.local_addr())
    );
}

#[test]
fn test_reliable_payloads_arrive_in_send_order() {
    let mut pair = connected_pair(SessionConfig::default(), SessionConfig::default());

    for i in 0u32..100 {
        pair.client
            .send(pair.to_server, &i.to_ne_bytes(), 0, Delivery::Reliable)
            .unwrap();
    }
    pair.client.flush().unwrap();

    let events = exchange(&mut pair.server, &mut pair.client, |e| {
        payloads(e, 0).len() >= 100
    });

    let expected: Vec<Vec<u8>> = (0u32..100).map(|i| i.to_ne_bytes().to_vec()).collect();
    assert_eq!(payloads(&events, 0), expected);
    assert!(pair.client.stats().packets_sent > 0);
    assert!(pair.server.stats().bytes_received > 0);
}

#[test]
fn test_reliable_delivery_survives_packet_loss() {
    let mut pair = connected_pair(lossy(0.25), lossy(0.25));

    for i in 0u32..50 {
        pair.client
            .send(pair.to_server, &i.to_ne_bytes(), 0, Delivery::Reliable)
            .unwrap();
    }
    pair.client.flush().unwrap();

    let events = exchange(&mut pair.server, &mut pair.client, |e| {
        payloads(e, 0).len() >= 50
    });

    let expected: Vec<Vec<u8>> = (0u32..50).map(|i| i.to_ne_bytes().to_vec()).collect();
    assert_eq!(payloads(&events, 0), expected);
    assert!(pair.client.stats().packets_dropped > 0);
    assert!(pair.client.stats().resends > 0);
}

#[test]
fn test_large_payloads_are_reassembled_under_loss() {
    let mut pair = connected_pair(lossy(0.1), lossy(0.1));

    let large: Vec<Vec<u8>> = (0u8..3)
        .map(|n| (0..net::MAX_FRAGMENT_SIZE * 6 + 17).map(|i| (i as u8) ^ n).collect())
        .collect();
    for payload in &large {
        pair.server
            .send(pair.to_client, payload, 0, Delivery::Reliable)
            .unwrap();
        pair.server
            .send(pair.to_client, b"between", 0, Delivery::Reliable)
            .unwrap();
    }
    pair.server.flush().unwrap();

    let events = exchange(&mut pair.client, &mut pair.server, |e| {
        payloads(e, 0).len() >= 6
    });

    let expected: Vec<Vec<u8>> = large
        .into_iter()
        .flat_map(|payload| [payload, b"between".to_vec()])
        .collect();
    assert_eq!(payloads(&events, 0), expected);
}

#[test]
fn test_oversized_unreliable_payload_is_delivered_whole() {
    let mut pair = connected_pair(SessionConfig::default(), SessionConfig::default());
    let payload = vec![0x5a; net::MAX_FRAGMENT_SIZE * 2];

    pair.client
        .send(pair.to_server, &payload, 1, Delivery::Unreliable)
        .unwrap();
    pair.client.flush().unwrap();

    let events = exchange(&mut pair.server, &mut pair.client, |e| {
        !payloads(e, 1).is_empty()
    });
    assert_eq!(payloads(&events, 1), vec![payload]);
}

#[test]
fn test_channels_are_tagged_independently() {
    let mut pair = connected_pair(SessionConfig::default(), SessionConfig::default());

    pair.server
        .send(pair.to_client, b"state", 0, Delivery::Reliable)
        .unwrap();
    pair.server
        .send(pair.to_client, b"control", 1, Delivery::Reliable)
        .unwrap();
    pair.server
        .send(pair.to_client, b"hint", 1, Delivery::Unreliable)
        .unwrap();
    pair.server.flush().unwrap();

    let events = exchange(&mut pair.client, &mut pair.server, |e| {
        payloads(e, 0).len() + payloads(e, 1).len() >= 3
    });

    assert_eq!(payloads(&events, 0), vec![b"state".to_vec()]);
    let control = payloads(&events, 1);
    assert_eq!(control.len(), 2);
    assert!(control.contains(&b"control".to_vec()));
    assert!(control.contains(&b"hint".to_vec()));
}

#[test]
fn test_broadcast_reaches_every_client() {
    let context = context();
    let server = bind(&context, Role::Server, 4, SessionConfig::default());
    let server_addr = server.local_addr();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = serve(server, Arc::clone(&stop));

    let mut first = bind(&context, Role::Client, 1, SessionConfig::default());
    let mut second = bind(&context, Role::Client, 1, SessionConfig::default());
    first.connect(server_addr, CONNECT_TIMEOUT).unwrap();
    second.connect(server_addr, CONNECT_TIMEOUT).unwrap();

    stop.store(true, Ordering::SeqCst);
    let (mut server, _) = handle.join().unwrap();
    assert_eq!(server.connected_count(), 2);

    server.broadcast(b"snapshot", 0).unwrap();
    server.flush().unwrap();

    for client in [&mut first, &mut second] {
        let events = exchange(client, &mut server, |e| !payloads(e, 0).is_empty());
        assert_eq!(payloads(&events, 0), vec![b"snapshot".to_vec()]);
    }
}

#[test]
fn test_connect_times_out_against_silent_peer() {
    let context = context();
    let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let mut client = bind(&context, Role::Client, 1, SessionConfig::default());

    let start = Instant::now();
    let result = client.connect(silent_addr, Duration::from_millis(300));
    assert!(matches!(result, Err(ConnectError::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(300));

    // The half-open attempt was reset, so the slot is free again.
    let result = client.connect(silent_addr, Duration::from_millis(50));
    assert!(matches!(result, Err(ConnectError::Timeout)));
    assert_eq!(client.connected_count(), 0);

    // The silent peer saw the connect attempts followed by a reset.
    silent.set_nonblocking(true).unwrap();
    let mut buffer = [0u8; 2048];
    assert!(silent.recv_from(&mut buffer).is_ok());
}

#[test]
fn test_no_free_peer_slot() {
    let mut pair = connected_pair(SessionConfig::default(), SessionConfig::default());
    let elsewhere = SocketAddr::from((Ipv4Addr::LOCALHOST, 9));

    let result = pair.client.connect(elsewhere, Duration::from_secs(1));
    assert!(matches!(result, Err(ConnectError::NoPeerSlot)));
    assert_eq!(
        pair.client.peer_state(pair.to_server),
        Some(PeerState::Connected)
    );
}

#[test]
fn test_full_server_rejects_connection() {
    let context = context();
    let server = bind(&context, Role::Server, 1, SessionConfig::default());
    let server_addr = server.local_addr();

    let stop = Arc::new(AtomicBool::new(false));
    let handle = serve(server, Arc::clone(&stop));

    let mut first = bind(&context, Role::Client, 1, SessionConfig::default());
    let mut second = bind(&context, Role::Client, 1, SessionConfig::default());
    first.connect(server_addr, CONNECT_TIMEOUT).unwrap();
    let result = second.connect(server_addr, CONNECT_TIMEOUT);

    stop.store(true, Ordering::SeqCst);
    let (server, _) = handle.join().unwrap();

    match result {
        Err(ConnectError::PeerRejected(reason)) => assert_eq!(reason, "server full"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(server.connected_count(), 1);
    assert_eq!(second.connected_count(), 0);
}

#[test]
fn test_disconnect_raises_event_on_peer() {
    let mut pair = connected_pair(SessionConfig::default(), SessionConfig::default());

    pair.client.disconnect(pair.to_server);
    assert_eq!(pair.client.peer_state(pair.to_server), None);

    let to_client = pair.to_client;
    let events = exchange(&mut pair.server, &mut pair.client, |e| {
        e.contains(&Event::Disconnect(to_client))
    });
    assert!(events.contains(&Event::Disconnect(to_client)));

    let result = pair.server.send(to_client, b"late", 0, Delivery::Reliable);
    assert!(matches!(result, Err(SendError::NotConnected(_))));
    assert_eq!(pair.server.connected_count(), 0);
}

#[test]
fn test_dropping_session_disconnects_peers() {
    let Pair {
        mut server,
        client,
        to_client,
        ..
    } = connected_pair(SessionConfig::default(), SessionConfig::default());

    drop(client);

    let deadline = Instant::now() + EXCHANGE_TIMEOUT;
    let mut events = Vec::new();
    while !events.contains(&Event::Disconnect(to_client)) && Instant::now() < deadline {
        events.extend(server.poll(Duration::from_millis(10)).unwrap());
    }
    assert!(events.contains(&Event::Disconnect(to_client)));
}

#[test]
fn test_silent_peer_times_out() {
    let server_config = SessionConfig {
        peer_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let Pair {
        mut server,
        client,
        to_client,
        ..
    } = connected_pair(server_config, SessionConfig::default());

    // The client is kept alive but never polled again, so it sends nothing.
    let start = Instant::now();
    let mut events = Vec::new();
    while !events.contains(&Event::Disconnect(to_client))
        && start.elapsed() < EXCHANGE_TIMEOUT
    {
        events.extend(server.poll(Duration::from_millis(20)).unwrap());
    }

    assert!(events.contains(&Event::Disconnect(to_client)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    drop(client);
}

#[test]
fn test_foreign_datagrams_are_ignored() {
    let context = context();
    let mut server = bind(&context, Role::Server, 4, SessionConfig::default());

    let stranger = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    stranger
        .send_to(b"definitely not a frame", server.local_addr())
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    while server.stats().packets_received == 0 && Instant::now() < deadline {
        assert!(server.poll(Duration::from_millis(10)).unwrap().is_empty());
    }

    assert_eq!(server.stats().packets_received, 1);
    assert_eq!(server.stats().packets_dropped, 1);
    assert_eq!(server.connected_count(), 0);
}
