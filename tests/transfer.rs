//! End-to-end transfer scenarios over the in-memory transport.
//!
//! Every test runs under tokio's paused clock, so retransmission timeouts
//! elapse instantly and deterministically.  The server half is spawned as a
//! separate task; faults are injected with [`Lossy`] on whichever side's
//! outbound datagrams the scenario needs to lose.

use std::time::Duration;

use rdt_udp::config::{GrantPolicy, SessionParams, TransferConfig};
use rdt_udp::error::TransferError;
use rdt_udp::negotiator;
use rdt_udp::report::{ReceiveReport, SendReport};
use rdt_udp::session::Session;
use rdt_udp::simulator::{FaultPlan, Lossy, MemoryTransport};
use rdt_udp::socket::{Recv, Transport};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Grants 516-byte datagrams and a 500 ms timeout, as in the reference
/// scenario.
fn policy() -> GrantPolicy {
    GrantPolicy {
        max_datagram_size: 516,
        timeout_ms: Some(500),
        ..GrantPolicy::default()
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

struct Served {
    params: SessionParams,
    received: ReceiveReport,
    sent: SendReport,
    echoed: Vec<u8>,
}

/// In-memory echo server.  `local_timeout` overrides the server's own read
/// deadline so its timers never race the client's.
async fn serve<T: Transport>(
    transport: T,
    policy: GrantPolicy,
    local_timeout: Duration,
) -> Result<Served, TransferError> {
    let mut buf = [0u8; 64];
    let grant = loop {
        if let Recv::Datagram(n) = transport.recv(&mut buf, Duration::from_secs(3600)).await.unwrap() {
            if let Some(grant) = negotiator::grant(&buf[..n], &policy) {
                break grant;
            }
        }
    };
    transport.send(&grant.reply.encode()).await.unwrap();

    let local = grant.params.with_timeout(local_timeout);
    let mut session = Session::accepted(transport, local, &grant.reply);
    let mut echoed = Vec::new();
    let received = session.receive_stream(&mut echoed, |_, _| {}).await?;
    let sent = session.send_stream(&echoed[..], |_, _| {}).await?;
    Ok(Served {
        params: grant.params,
        received,
        sent,
        echoed,
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Request 516/200, server grants 516/500; 1000 bytes go out as 514 + 486
/// payload bytes plus an Eof.
#[tokio::test(start_paused = true)]
async fn negotiated_grant_shapes_the_transfer() {
    let (client, server) = MemoryTransport::pair();
    let server = tokio::spawn(serve(server, policy(), Duration::from_secs(10)));

    let mut session = Session::connect(client, &TransferConfig::new(200, 516))
        .await
        .expect("handshake");
    assert_eq!(session.params().datagram_size(), 516);
    assert_eq!(session.params().timeout(), Duration::from_millis(500));

    let data = payload(1000);
    let mut frame_lens = Vec::new();
    let sent = session
        .send_stream(&data[..], |len, _| frame_lens.push(len))
        .await
        .expect("send");
    assert_eq!(sent.bytes_sent, 1000);
    assert_eq!(sent.frames, 3);
    assert_eq!(sent.frames_transmitted, 3);
    assert_eq!(sent.dropped_frames(), 0);
    assert_eq!(frame_lens, vec![516, 488, 2]);

    let mut echo = Vec::new();
    let received = session.receive_stream(&mut echo, |_, _| {}).await.expect("receive");
    assert_eq!(echo, data);
    assert_eq!(received.frames_accepted, 2);
    assert!(received.eof_received);

    let served = server.await.unwrap().expect("server");
    assert_eq!(served.params.timeout_ms(), 500);
    assert_eq!(served.received.data_frames_received, 2);
    assert_eq!(served.received.bytes_received, 1000);
    assert_eq!(served.sent.bytes_sent, 1000);
    assert_eq!(served.echoed, data);
}

/// The server's first data Ack (`A1`) is lost once: the client resends the
/// same Data frame once and the server does not deliver it twice.
#[tokio::test(start_paused = true)]
async fn lost_ack_causes_exactly_one_retransmission() {
    let (client, server) = MemoryTransport::pair();
    // Server outbound #0 is the HandshakeAck, #1 the Ack for D1.
    let server = Lossy::new(server, FaultPlan::drop_nth([1]));
    let server = tokio::spawn(serve(server, policy(), Duration::from_secs(10)));

    let mut session = Session::connect(client, &TransferConfig::new(200, 516))
        .await
        .expect("handshake");
    let data = payload(100);
    let sent = session.send_stream(&data[..], |_, _| {}).await.expect("send");
    // D1, D1 again, then E0.
    assert_eq!(sent.frames_transmitted, 3);
    assert_eq!(sent.frames, 2);
    assert_eq!(sent.bytes_sent, 100);

    let mut echo = Vec::new();
    session.receive_stream(&mut echo, |_, _| {}).await.expect("receive");
    assert_eq!(echo, data);

    let served = server.await.unwrap().expect("server");
    assert_eq!(served.received.data_frames_received, 2);
    assert_eq!(served.received.frames_accepted, 1);
    assert_eq!(served.received.bytes_received, 100);
    assert_eq!(served.received.dropped_acks(), 1);
}

/// The server's `A1` is held back until after its own retransmission, so the
/// client meets a stale `A1` while waiting on its Eof and has to resend it.
/// Nothing is delivered twice and the stream still ends after one Eof.
#[tokio::test(start_paused = true)]
async fn late_ack_is_treated_as_stale() {
    let (client, server) = MemoryTransport::pair();
    // Server outbound #1 is the first A1; it arrives behind #2, its resend.
    let server = Lossy::new(server, FaultPlan::reorder_nth([1]));
    let server = tokio::spawn(serve(server, policy(), Duration::from_secs(10)));

    let mut session = Session::connect(client, &TransferConfig::new(200, 516))
        .await
        .expect("handshake");
    let data = payload(100);
    let sent = session.send_stream(&data[..], |_, _| {}).await.expect("send");
    // D1 (Ack held), D1 again, E0 (answered by the late A1), E0 again.
    assert_eq!(sent.frames, 2);
    assert_eq!(sent.frames_transmitted, 4);
    assert_eq!(sent.acks_received, 3);
    assert_eq!(sent.bytes_sent, 100);

    let mut echo = Vec::new();
    session.receive_stream(&mut echo, |_, _| {}).await.expect("receive");
    assert_eq!(echo, data);

    let served = server.await.unwrap().expect("server");
    assert_eq!(served.received.data_frames_received, 2);
    assert_eq!(served.received.frames_accepted, 1);
    assert!(served.received.eof_received);
    assert_eq!(served.echoed, data);
}

/// Losing the HandshakeAck repeatedly only costs handshake retransmissions;
/// the parameters and the transfer are unaffected.
#[tokio::test(start_paused = true)]
async fn handshake_is_idempotent_under_lost_grants() {
    let (client, server) = MemoryTransport::pair();
    let server = Lossy::new(server, FaultPlan::drop_nth([0, 1, 2]));
    let server = tokio::spawn(serve(server, policy(), Duration::from_secs(10)));

    let mut session = Session::connect(client, &TransferConfig::new(200, 516))
        .await
        .expect("handshake");
    assert_eq!(session.params().datagram_size(), 516);
    assert_eq!(session.params().timeout_ms(), 500);

    let data = payload(2000);
    session.send_stream(&data[..], |_, _| {}).await.expect("send");
    let mut echo = Vec::new();
    session.receive_stream(&mut echo, |_, _| {}).await.expect("receive");
    assert_eq!(echo, data);

    let served = server.await.unwrap().expect("server");
    assert_eq!(served.echoed, data);
    assert_eq!(served.received.frames_accepted, 4);
}

#[tokio::test(start_paused = true)]
async fn handshake_gives_up_against_a_deaf_server() {
    let (client, server) = MemoryTransport::pair();
    let config = TransferConfig::new(200, 516).with_max_retries(2);
    let result = Session::connect(client, &config).await;
    assert!(matches!(
        result,
        Err(TransferError::HandshakeExhausted { attempts: 3 })
    ));
    drop(server);
}

/// One direction, random loss and duplication on everything the sender
/// emits: the stream arrives intact in exactly `ceil(S/C) + 1` logical
/// frames.
#[tokio::test(start_paused = true)]
async fn lossy_link_terminates_after_ceil_frames_plus_eof() {
    const SIZE: usize = 10_000;
    let params = SessionParams::from_grant(130, 50, 60).unwrap();
    let capacity = params.payload_capacity();

    let (client, server) = MemoryTransport::pair();
    let client = Lossy::new(client, FaultPlan::random(0.3, 0.1, 42));
    let mut sender = Session::established(client, params);
    let mut receiver = Session::established(server, params);

    let data = payload(SIZE);
    let mut out = Vec::new();
    let (sent, received) = tokio::join!(
        sender.send_stream(&data[..], |_, _| {}),
        receiver.receive_stream(&mut out, |_, _| {})
    );
    let sent = sent.expect("send");
    let received = received.expect("receive");

    let chunks = SIZE.div_ceil(capacity) as u64;
    assert_eq!(sent.frames, chunks + 1);
    assert_eq!(received.frames_accepted, chunks);
    assert_eq!(out, data);
    assert!(sender.transport().dropped() > 0);
    assert!(sent.frames_transmitted > sent.frames);
}

/// A sender whose peer never answers fails with its progress attached.
#[tokio::test(start_paused = true)]
async fn exhausted_send_reports_progress() {
    let params = SessionParams::from_grant(16, 100, 3).unwrap();
    let (client, server) = MemoryTransport::pair();
    let mut sender = Session::established(client, params);

    // Acknowledge the first frame by hand, then go silent.
    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        server.recv(&mut buf, Duration::from_secs(60)).await.unwrap();
        server.send(b"A1").await.unwrap();
        server
    });

    let err = sender
        .send_stream(&payload(40)[..], |_, _| {})
        .await
        .expect_err("peer went silent");
    match err {
        TransferError::RetriesExhausted {
            attempts, progress, ..
        } => {
            assert_eq!(attempts, 4);
            assert_eq!(progress.bytes, 14);
        }
        other => panic!("unexpected error: {other}"),
    }
    drop(peer.await.unwrap());
}
