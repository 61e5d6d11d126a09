//! Inbound stop-and-wait state and the receive loop.
//!
//! [`Receiver`] decides what every inbound datagram means:
//!
//! - Only the frame carrying `expected` is **accepted**; its payload is
//!   delivered exactly once and a fresh Ack is queued.
//! - A frame carrying the other bit is a **duplicate** of the last accepted
//!   one (its Ack was lost); the last Ack is resent and the payload dropped.
//! - Anything that is neither Data nor Eof is **stray** traffic and ignored,
//!   as is a Data frame longer than the negotiated datagram size.
//!
//! All socket and sink I/O is the caller's responsibility ([`run`]), same
//! pattern as [`crate::sender::Sender`].

use std::io;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::config::SessionParams;
use crate::error::TransferError;
use crate::frame::{Frame, FrameKind, Inbound, SeqBit, HANDSHAKE_LEN};
use crate::report::ReceiveReport;
use crate::socket::{Recv, Transport};
use crate::state::Phase;

/// What the caller must do with one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event<'a> {
    /// New in-order data: deliver `payload`, then send [`Receiver::last_ack`].
    Accepted { payload: &'a [u8] },
    /// Already-seen frame: resend [`Receiver::last_ack`], deliver nothing.
    Duplicate,
    /// The expected Eof: send [`Receiver::last_ack`] and stop.
    Finished,
    /// Not Data or Eof: ignore.
    Stray,
}

/// Stop-and-wait receive-side state for one direction of a session.
#[derive(Debug)]
pub struct Receiver {
    /// The only sequence bit currently acceptable.
    expected: SeqBit,
    /// Encoded reply most recently sent (or owed) to the peer.
    last_ack: Vec<u8>,
    /// Answer retransmitted Handshakes with `last_ack` until data flows.
    replay_handshake: bool,
    /// Longest acceptable Data datagram, header included.
    frame_limit: usize,
    report: ReceiveReport,
}

impl Receiver {
    /// `last_accepted` is the bit of the last frame taken from the peer in
    /// this direction (the handshake's bit for a fresh session).  The
    /// initial `last_ack` acknowledges that position, which the peer treats
    /// as stale.
    pub fn new(last_accepted: SeqBit) -> Self {
        Self {
            expected: last_accepted.toggled(),
            last_ack: Frame::Ack { seq: last_accepted }.encode(),
            replay_handshake: false,
            frame_limit: usize::MAX,
            report: ReceiveReport::default(),
        }
    }

    /// Server side of a fresh session: until the first frame is accepted the
    /// owed reply is the HandshakeAck, so a lost grant is recovered both on
    /// timeout and when the client retransmits its Handshake.
    pub fn replaying(last_accepted: SeqBit, handshake_ack: Vec<u8>) -> Self {
        Self {
            last_ack: handshake_ack,
            replay_handshake: true,
            ..Self::new(last_accepted)
        }
    }

    /// Treat Data datagrams longer than `limit` bytes as stray.
    #[must_use]
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = limit;
        self
    }

    /// Classify `buf` and update sequence state.
    pub fn on_datagram<'a>(&mut self, buf: &'a [u8]) -> Event<'a> {
        match Inbound::classify(buf) {
            Some(Inbound::Data { .. }) if buf.len() > self.frame_limit => Event::Stray,
            Some(Inbound::Data { seq, payload }) => {
                self.report.data_frames_received += 1;
                if seq != self.expected {
                    return Event::Duplicate;
                }
                self.accept(seq);
                self.report.frames_accepted += 1;
                self.report.bytes_received += payload.len() as u64;
                Event::Accepted { payload }
            }
            Some(Inbound::Eof { seq }) => {
                if seq != self.expected {
                    return Event::Duplicate;
                }
                self.accept(seq);
                self.report.eof_received = true;
                Event::Finished
            }
            None if self.replay_handshake && is_handshake(buf) => Event::Duplicate,
            None => Event::Stray,
        }
    }

    fn accept(&mut self, seq: SeqBit) {
        self.last_ack = Frame::Ack { seq }.encode();
        self.expected.toggle();
        self.replay_handshake = false;
    }

    /// The reply to (re)send now.
    pub fn last_ack(&self) -> &[u8] {
        &self.last_ack
    }

    /// Record that [`Receiver::last_ack`] went on the wire.
    pub fn on_ack_sent(&mut self) {
        self.report.acks_sent += 1;
    }

    /// Bit the next new frame must carry.
    pub fn expected(&self) -> SeqBit {
        self.expected
    }

    /// Bit of the last accepted frame.
    pub fn last_accepted(&self) -> SeqBit {
        self.expected.toggled()
    }

    pub fn report(&self) -> ReceiveReport {
        self.report
    }

    fn failed(&self, source: io::Error, stream: bool) -> TransferError {
        let progress = self.report.progress();
        if stream {
            TransferError::Stream {
                phase: Phase::Receiving,
                progress,
                source,
            }
        } else {
            TransferError::Transport {
                phase: Phase::Receiving,
                progress,
                source,
            }
        }
    }
}

fn is_handshake(buf: &[u8]) -> bool {
    Frame::decode(buf, FrameKind::Handshake).is_ok()
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// Write the peer's stream into `sink` until its Eof is accepted.
///
/// `receiver` carries the starting sequence state; on return
/// [`Receiver::last_accepted`] is the session's new inbound bit.  `hook`
/// receives `(datagram_len, time_since_previous_accept)` for every
/// accepted Data frame.
///
/// More than `max_retries` consecutive timeouts end the phase with
/// [`TransferError::RetriesExhausted`].  Reads use one spare byte past the
/// datagram size so an oversized frame is seen whole and can be refused
/// (see [`Receiver::with_frame_limit`]) instead of arriving truncated.
pub async fn run<T, W, H>(
    transport: &T,
    params: &SessionParams,
    receiver: &mut Receiver,
    sink: &mut W,
    hook: &mut H,
) -> Result<ReceiveReport, TransferError>
where
    T: Transport,
    W: AsyncWrite + Unpin,
    H: FnMut(usize, Duration),
{
    let started = Instant::now();
    let mut previous_accept = started;
    let mut buf = vec![0u8; (params.datagram_size() as usize).max(HANDSHAKE_LEN) + 1];
    // Consecutive deadlines with nothing received; a silent peer is held to
    // the same budget as a frame awaiting its Ack.
    let mut idle = 0u32;

    loop {
        let len = match transport
            .recv(&mut buf, params.timeout())
            .await
            .map_err(|e| receiver.failed(e, false))?
        {
            Recv::Datagram(len) => {
                idle = 0;
                len
            }
            Recv::TimedOut => {
                idle += 1;
                if idle > params.max_retries() {
                    log::warn!("[recv] peer silent for {idle} timeouts; giving up");
                    return Err(TransferError::RetriesExhausted {
                        phase: Phase::Receiving,
                        attempts: idle,
                        progress: receiver.report().progress(),
                    });
                }
                log::trace!("[recv] timeout; resending last ACK");
                send_ack(transport, receiver).await?;
                continue;
            }
        };

        match receiver.on_datagram(&buf[..len]) {
            Event::Accepted { payload } => {
                let now = Instant::now();
                hook(len, now.saturating_duration_since(previous_accept));
                previous_accept = now;
                log::debug!(
                    "[recv] ← DATA seq={} len={}",
                    receiver.last_accepted(),
                    payload.len()
                );
                sink.write_all(payload)
                    .await
                    .map_err(|e| receiver.failed(e, true))?;
                send_ack(transport, receiver).await?;
            }
            Event::Duplicate => {
                log::trace!("[recv] ← duplicate; resending last ACK");
                send_ack(transport, receiver).await?;
            }
            Event::Finished => {
                log::debug!("[recv] ← EOF seq={}", receiver.last_accepted());
                send_ack(transport, receiver).await?;
                break;
            }
            Event::Stray => {
                log::trace!("[recv] ← {len}-byte stray datagram discarded");
            }
        }
    }

    sink.flush().await.map_err(|e| receiver.failed(e, true))?;
    let mut report = receiver.report();
    report.elapsed = started.elapsed();
    Ok(report)
}

async fn send_ack<T: Transport>(transport: &T, receiver: &mut Receiver) -> Result<(), TransferError> {
    transport
        .send(receiver.last_ack())
        .await
        .map_err(|e| receiver.failed(e, false))?;
    receiver.on_ack_sent();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: SeqBit, payload: &[u8]) -> Vec<u8> {
        Frame::Data {
            seq,
            payload: payload.to_vec(),
        }
        .encode()
    }

    #[test]
    fn initial_state_expects_one_and_owes_ack_zero() {
        let r = Receiver::new(SeqBit::ZERO);
        assert_eq!(r.expected(), SeqBit::ONE);
        assert_eq!(r.last_ack(), b"A0");
    }

    #[test]
    fn in_order_frame_is_accepted_and_acked() {
        let mut r = Receiver::new(SeqBit::ZERO);
        let frame = data(SeqBit::ONE, b"hello");
        assert_eq!(
            r.on_datagram(&frame),
            Event::Accepted { payload: b"hello" }
        );
        assert_eq!(r.last_ack(), b"A1");
        assert_eq!(r.expected(), SeqBit::ZERO);
        assert_eq!(r.report().bytes_received, 5);
    }

    #[test]
    fn duplicate_frame_is_not_redelivered() {
        let mut r = Receiver::new(SeqBit::ZERO);
        let frame = data(SeqBit::ONE, b"hello");
        r.on_datagram(&frame);
        assert_eq!(r.on_datagram(&frame), Event::Duplicate);
        // The reply to a duplicate is the Ack that was lost.
        assert_eq!(r.last_ack(), b"A1");

        let report = r.report();
        assert_eq!(report.data_frames_received, 2);
        assert_eq!(report.frames_accepted, 1);
        assert_eq!(report.bytes_received, 5);
    }

    #[test]
    fn stale_eof_does_not_terminate() {
        let mut r = Receiver::new(SeqBit::ZERO);
        assert_eq!(r.on_datagram(b"E0"), Event::Duplicate);
        assert!(!r.report().eof_received);
        assert_eq!(r.on_datagram(b"E1"), Event::Finished);
        assert!(r.report().eof_received);
        assert_eq!(r.last_ack(), b"A1");
    }

    #[test]
    fn stray_ack_is_ignored_without_state_change() {
        let mut r = Receiver::new(SeqBit::ZERO);
        assert_eq!(r.on_datagram(b"A1"), Event::Stray);
        assert_eq!(r.on_datagram(b"C00051600200"), Event::Stray);
        assert_eq!(r.expected(), SeqBit::ONE);
        assert_eq!(r.report().data_frames_received, 0);
    }

    #[test]
    fn replaying_receiver_answers_handshake_until_data_arrives() {
        let grant = b"A00051600500".to_vec();
        let mut r = Receiver::replaying(SeqBit::ZERO, grant.clone());
        assert_eq!(r.last_ack(), grant.as_slice());
        assert_eq!(r.on_datagram(b"C00051600200"), Event::Duplicate);

        r.on_datagram(&data(SeqBit::ONE, b"x"));
        assert_eq!(r.last_ack(), b"A1");
        assert_eq!(r.on_datagram(b"C00051600200"), Event::Stray);
    }

    #[test]
    fn acks_sent_feed_the_loss_estimate() {
        let mut r = Receiver::new(SeqBit::ZERO);
        r.on_datagram(&data(SeqBit::ONE, b"x"));
        r.on_ack_sent();
        r.on_datagram(&data(SeqBit::ONE, b"x"));
        r.on_ack_sent();
        assert_eq!(r.report().dropped_acks(), 1);
    }

    #[test]
    fn data_longer_than_the_limit_is_stray() {
        let mut r = Receiver::new(SeqBit::ZERO).with_frame_limit(8);
        assert_eq!(r.on_datagram(b"D1abcdefg"), Event::Stray);
        assert_eq!(r.expected(), SeqBit::ONE);
        assert_eq!(r.report().data_frames_received, 0);

        assert_eq!(
            r.on_datagram(b"D1abcdef"),
            Event::Accepted { payload: b"abcdef" }
        );
        // Control frames are never held to the limit.
        let mut r = Receiver::replaying(SeqBit::ZERO, b"A00000800100".to_vec()).with_frame_limit(8);
        assert_eq!(r.on_datagram(b"C00000800100"), Event::Duplicate);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_data_is_not_delivered() {
        use crate::simulator::MemoryTransport;

        let (local, peer) = MemoryTransport::pair();
        let params = SessionParams::from_grant(8, 100, 2).unwrap();
        let mut receiver = Receiver::new(SeqBit::ZERO).with_frame_limit(8);

        peer.send(b"D10123456789").await.unwrap();
        peer.send(b"D1abc").await.unwrap();
        peer.send(b"E0").await.unwrap();

        let mut sink = Vec::<u8>::new();
        let mut hook = |_: usize, _: Duration| {};
        let report = run(&local, &params, &mut receiver, &mut sink, &mut hook)
            .await
            .expect("receive");
        assert_eq!(sink, b"abc");
        assert_eq!(report.frames_accepted, 1);
        assert_eq!(report.data_frames_received, 1);
        assert!(report.eof_received);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_abandoned_after_the_retry_budget() {
        use crate::simulator::MemoryTransport;

        let (local, peer) = MemoryTransport::pair();
        let params = SessionParams::from_grant(16, 100, 2).unwrap();
        let mut receiver = Receiver::new(SeqBit::ZERO);
        let mut sink = Vec::<u8>::new();
        let mut hook = |_: usize, _: Duration| {};
        let result = run(&local, &params, &mut receiver, &mut sink, &mut hook).await;
        assert!(matches!(
            result,
            Err(TransferError::RetriesExhausted {
                phase: Phase::Receiving,
                attempts: 3,
                ..
            })
        ));

        // Each of the first two timeouts re-sent the handshake-position Ack.
        let mut buf = [0u8; 4];
        let mut resent = 0;
        while let Recv::Datagram(n) = peer.recv(&mut buf, Duration::from_millis(1)).await.unwrap() {
            assert_eq!(&buf[..n], b"A0");
            resent += 1;
        }
        assert_eq!(resent, 2);
    }
}
