//! End-to-end coverage over two in-process links connected through
//! [`securelink::adapters::sim::SimAdapter`]: open, pair, exchange
//! plaintext and ciphertext, rotate status, and reject a bad verdict.

use std::sync::mpsc;
use std::time::Duration;

use securelink::adapters::sim::SimAdapter;
use securelink::adapters::AutoAcceptPairingDelegate;
use securelink::ticket::InMemoryTicketStore;
use securelink::{EngineConfig, HostEvent, MessageKind, SecureLink};

const SERVER_ID: u64 = 100;
const CLIENT_ID: u64 = 200;
const SERVER_ADDR: [u8; 6] = [1, 0, 0, 0, 0, 0];
const CLIENT_ADDR: [u8; 6] = [2, 0, 0, 0, 0, 0];

const EVENT_WAIT: Duration = Duration::from_secs(2);

fn spawn_pair() -> (SecureLink, mpsc::Receiver<HostEvent>, SecureLink, mpsc::Receiver<HostEvent>) {
    let (server_adapter, client_adapter) = SimAdapter::pair(256, SERVER_ADDR, CLIENT_ADDR);

    let (server_tx, server_rx) = mpsc::channel();
    let (client_tx, client_rx) = mpsc::channel();

    let mut config = EngineConfig::default();
    config.status_check_timeout_ms = 2_000;

    let server = SecureLink::new(
        SERVER_ID,
        config,
        Box::new(server_adapter),
        Box::new(InMemoryTicketStore::new()),
        Box::new(move |event| {
            let _ = server_tx.send(event);
        }),
        Box::new(AutoAcceptPairingDelegate),
    )
    .expect("server link construction");

    let client = SecureLink::new(
        CLIENT_ID,
        config,
        Box::new(client_adapter),
        Box::new(InMemoryTicketStore::new()),
        Box::new(move |event| {
            let _ = client_tx.send(event);
        }),
        Box::new(AutoAcceptPairingDelegate),
    )
    .expect("client link construction");

    server.open_server(CLIENT_ADDR).expect("server connect");
    client.open_server(SERVER_ADDR).expect("client connect");

    (server, server_rx, client, client_rx)
}

fn expect_within<T>(rx: &mpsc::Receiver<T>, pred: impl Fn(&T) -> bool, what: &str) -> T {
    let deadline = std::time::Instant::now() + EVENT_WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for {what}");
        }
        match rx.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(_) => panic!("channel closed waiting for {what}"),
        }
    }
}

fn run_happy_pairing(server: &SecureLink, server_rx: &mpsc::Receiver<HostEvent>, client: &SecureLink, client_rx: &mpsc::Receiver<HostEvent>) {
    expect_within(server_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "server GattConnect");
    expect_within(client_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "client GattConnect");

    client.tx_pairing_request(0xFFFF_FFFF).expect("tx_pairing_request");

    expect_within(server_rx, |e| matches!(e, HostEvent::PairingStart), "server PairingStart");
    let server_event = expect_within(
        server_rx,
        |e| matches!(e, HostEvent::PairingDigestReady { .. }),
        "server PairingDigestReady",
    );
    let client_event = expect_within(
        client_rx,
        |e| matches!(e, HostEvent::PairingDigestReady { .. }),
        "client PairingDigestReady",
    );

    let digest_of = |event: HostEvent| match event {
        HostEvent::PairingDigestReady { digest, .. } => digest,
        _ => unreachable!(),
    };
    assert_eq!(
        digest_of(server_event),
        digest_of(client_event),
        "both sides must derive the same verification digest"
    );

    server.tx_pairing_verdict(true, 0).expect("server verdict");
    client.tx_pairing_verdict(true, 0).expect("client verdict");

    expect_within(server_rx, |e| matches!(e, HostEvent::PairingSuccess { .. }), "server PairingSuccess");
    expect_within(client_rx, |e| matches!(e, HostEvent::PairingSuccess { .. }), "client PairingSuccess");

    assert!(server.is_paired(CLIENT_ID));
    assert!(client.is_paired(SERVER_ID));
}

#[test]
fn happy_path_pairing_then_plaintext_and_ciphertext() {
    let (server, server_rx, client, client_rx) = spawn_pair();
    run_happy_pairing(&server, &server_rx, &client, &client_rx);

    client.tx_plaintext(SERVER_ID, b"hello from client").expect("tx_plaintext");
    let msg = server.rx_msg(Duration::from_secs(2)).expect("server rx_msg");
    assert_eq!(msg.kind, MessageKind::Data);
    assert_eq!(msg.payload, b"hello from client");
    assert_eq!(msg.device_id, CLIENT_ID);

    let plaintext = vec![0x42u8; 300];
    client.tx_ciphertext(SERVER_ID, &plaintext).expect("tx_ciphertext");
    let msg = server.rx_msg(Duration::from_secs(2)).expect("server rx_msg ciphertext");
    assert_eq!(msg.kind, MessageKind::Ciphertext);
    assert_eq!(msg.payload, plaintext);

    server.tx_plaintext(CLIENT_ID, b"reply from server").expect("tx_plaintext reply");
    let msg = client.rx_msg(Duration::from_secs(2)).expect("client rx_msg");
    assert_eq!(msg.payload, b"reply from server");
}

#[test]
fn ping_gets_an_automatic_response() {
    let (server, server_rx, client, client_rx) = spawn_pair();
    expect_within(&server_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "server GattConnect");
    expect_within(&client_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "client GattConnect");

    client.tx_ping().expect("tx_ping");
    expect_within(&server_rx, |e| matches!(e, HostEvent::RxPing(_)), "server RxPing");
    expect_within(&client_rx, |e| matches!(e, HostEvent::RxResponse(_)), "client RxResponse");
}

#[test]
fn status_check_rotates_ticket_material_on_both_sides() {
    let (server, server_rx, client, client_rx) = spawn_pair();
    run_happy_pairing(&server, &server_rx, &client, &client_rx);

    server.tx_status_check(CLIENT_ID).expect("tx_status_check");
    expect_within(&server_rx, |e| matches!(e, HostEvent::StatusOk { .. }), "server StatusOk");
    expect_within(&client_rx, |e| matches!(e, HostEvent::StatusOk { .. }), "client StatusOk");

    // A subsequent message still round-trips after the rotation.
    client.tx_plaintext(SERVER_ID, b"still alive").expect("tx_plaintext after rotation");
    let msg = server.rx_msg(Duration::from_secs(2)).expect("server rx_msg after rotation");
    assert_eq!(msg.payload, b"still alive");
}

#[test]
fn rejected_pairing_verdict_leaves_no_ticket() {
    let (server, server_rx, client, client_rx) = spawn_pair();
    expect_within(&server_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "server GattConnect");
    expect_within(&client_rx, |e| matches!(e, HostEvent::GattConnect { .. }), "client GattConnect");

    client.tx_pairing_request(0xFFFF_FFFF).expect("tx_pairing_request");
    expect_within(&server_rx, |e| matches!(e, HostEvent::PairingDigestReady { .. }), "server PairingDigestReady");
    expect_within(&client_rx, |e| matches!(e, HostEvent::PairingDigestReady { .. }), "client PairingDigestReady");

    // Client rejects what it saw; server still accepts its own local check.
    client.tx_pairing_verdict(false, 0).expect("client verdict");
    server.tx_pairing_verdict(true, 0).expect("server verdict");

    expect_within(&server_rx, |e| matches!(e, HostEvent::PairingErr), "server PairingErr");
    expect_within(&client_rx, |e| matches!(e, HostEvent::PairingErr), "client PairingErr");

    assert!(!server.is_paired(CLIENT_ID));
    assert!(!client.is_paired(SERVER_ID));
}

#[test]
fn disabling_rx_still_posts_the_event_but_drops_the_message_from_the_queue() {
    let (server, server_rx, client, client_rx) = spawn_pair();
    run_happy_pairing(&server, &server_rx, &client, &client_rx);

    server.disable_rx(MessageKind::Data);
    client.tx_plaintext(SERVER_ID, b"should not land in the queue").expect("tx_plaintext");

    expect_within(&server_rx, |e| matches!(e, HostEvent::RxData(_)), "server RxData event");
    assert_eq!(server.rx_msg(Duration::from_millis(200)).err(), Some(securelink::Error::Timeout));
}
