//! Outbound stop-and-wait state and the send loop.
//!
//! [`Sender`] tracks the alternating sequence bit and the single in-flight
//! frame.  It does **not** touch the socket; [`run`] owns the actual
//! send/receive loop and calls into it.
//!
//! # Stop-and-Wait contract
//! - At most **one** frame is in flight at any moment (`unacked`).
//! - The sequence bit is toggled before every frame, the final Eof included.
//! - On a matching Ack: tally the payload, clear `unacked`.
//! - On timeout, stale Ack, or garbage: resend the same datagram unchanged.
//! - A frame is transmitted at most `1 + max_retries` times.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::config::SessionParams;
use crate::error::TransferError;
use crate::frame::{Frame, FrameKind, SeqBit};
use crate::report::SendReport;
use crate::socket::{Recv, Transport};
use crate::state::Phase;

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A frame that has been built but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// The frame on the wire.
    pub frame: Frame,
    /// Its encoded form, reused verbatim for every retransmission.
    pub datagram: Vec<u8>,
    /// How many times this frame has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Time of the first transmission; latency samples span all retries.
    pub first_sent: Option<Instant>,
}

/// How the sender classified a reply datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Ack for the in-flight frame; the frame is done.  `latency` runs from
    /// its first transmission, so it includes any loss recovery.
    Confirmed { latency: Duration },
    /// Ack carrying the other bit, i.e. a delayed Ack for the previous frame.
    Stale(SeqBit),
    /// Not an Ack at all.
    Unparseable,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Stop-and-wait send-side state for one direction of a session.
#[derive(Debug)]
pub struct Sender {
    /// Bit carried by the most recently built frame.
    seq: SeqBit,
    max_retries: u32,
    /// The in-flight frame, or `None` when the sender is idle.
    unacked: Option<InFlight>,
    report: SendReport,
}

impl Sender {
    /// `seq` is the bit of the last frame sent in this direction (the
    /// handshake's bit for a fresh session); the first frame carries the
    /// other one.
    pub fn new(seq: SeqBit, max_retries: u32) -> Self {
        Self {
            seq,
            max_retries,
            unacked: None,
            report: SendReport::default(),
        }
    }

    /// Build the next frame from `payload` and place it in the in-flight
    /// slot.  An empty payload means the source is exhausted and yields the
    /// terminating Eof.
    pub fn load(&mut self, payload: &[u8]) -> &InFlight {
        debug_assert!(
            self.unacked.is_none(),
            "load called while a frame is already in flight"
        );
        self.seq.toggle();
        let frame = if payload.is_empty() {
            Frame::Eof { seq: self.seq }
        } else {
            Frame::Data {
                seq: self.seq,
                payload: payload.to_vec(),
            }
        };
        let datagram = frame.encode();
        self.unacked.insert(InFlight {
            frame,
            datagram,
            tx_count: 0,
            first_sent: None,
        })
    }

    /// Account for one (re)transmission of the in-flight frame.
    ///
    /// Returns `false` once the retry budget is spent; the frame must not be
    /// sent again.
    pub fn on_transmit(&mut self, now: Instant) -> bool {
        let Some(entry) = self.unacked.as_mut() else {
            return false;
        };
        if entry.tx_count > self.max_retries {
            return false;
        }
        entry.tx_count += 1;
        entry.first_sent.get_or_insert(now);
        self.report.frames_transmitted += 1;
        true
    }

    /// Encoded in-flight frame, or an empty slice when idle.
    pub fn datagram(&self) -> &[u8] {
        self.unacked.as_ref().map_or(&[], |e| e.datagram.as_slice())
    }

    /// Process a reply datagram.
    ///
    /// On [`AckOutcome::Confirmed`] the in-flight slot is cleared and the
    /// payload is counted as sent.
    pub fn on_datagram(&mut self, buf: &[u8], now: Instant) -> AckOutcome {
        let Ok(ack) = Frame::decode(buf, FrameKind::Ack) else {
            return AckOutcome::Unparseable;
        };
        self.report.acks_received += 1;
        match self.unacked.take() {
            Some(entry) if ack.seq() == entry.frame.seq() => {
                if let Frame::Data { payload, .. } = &entry.frame {
                    self.report.bytes_sent += payload.len() as u64;
                }
                self.report.frames += 1;
                let latency = entry
                    .first_sent
                    .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
                AckOutcome::Confirmed { latency }
            }
            other => {
                self.unacked = other;
                AckOutcome::Stale(ack.seq())
            }
        }
    }

    /// Bit of the most recently built frame.
    pub fn seq(&self) -> SeqBit {
        self.seq
    }

    /// Number of transmissions of the in-flight frame, or `0` when idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    /// `true` when a frame is waiting for an Ack.
    pub fn has_unacked(&self) -> bool {
        self.unacked.is_some()
    }

    pub fn report(&self) -> SendReport {
        self.report
    }

    fn failed(&self, source: io::Error, stream: bool) -> TransferError {
        let progress = self.report.progress();
        if stream {
            TransferError::Stream {
                phase: Phase::Sending,
                progress,
                source,
            }
        } else {
            TransferError::Transport {
                phase: Phase::Sending,
                progress,
                source,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Send loop
// ---------------------------------------------------------------------------

/// Push `source` to the peer as Data frames terminated by one Eof, each
/// individually acknowledged.
///
/// `seq` is the session's outbound bit; it is advanced as frames are
/// confirmed.  `hook` receives `(frame_len, latency)` for every confirmed
/// frame, where latency runs from the first transmission attempt.
pub async fn run<T, R, H>(
    transport: &T,
    params: &SessionParams,
    seq: &mut SeqBit,
    source: &mut R,
    hook: &mut H,
) -> Result<SendReport, TransferError>
where
    T: Transport,
    R: AsyncRead + Unpin,
    H: FnMut(usize, Duration),
{
    let started = Instant::now();
    let mut sender = Sender::new(*seq, params.max_retries());
    let mut chunk = vec![0u8; params.payload_capacity()];
    let mut reply = vec![0u8; params.datagram_size() as usize];

    loop {
        let n = fill_chunk(source, &mut chunk)
            .await
            .map_err(|e| sender.failed(e, true))?;
        let entry = sender.load(&chunk[..n]);
        let frame_len = entry.datagram.len();
        let is_eof = matches!(entry.frame, Frame::Eof { .. });
        log::debug!(
            "[send] → {} seq={} len={}",
            entry.frame.kind(),
            entry.frame.seq(),
            n
        );

        let latency = loop {
            if !sender.on_transmit(Instant::now()) {
                let attempts = sender.retransmit_count();
                log::warn!("[send] no ACK after {attempts} transmissions; giving up");
                return Err(TransferError::RetriesExhausted {
                    phase: Phase::Sending,
                    attempts,
                    progress: sender.report().progress(),
                });
            }
            transport
                .send(sender.datagram())
                .await
                .map_err(|e| sender.failed(e, false))?;

            match transport
                .recv(&mut reply, params.timeout())
                .await
                .map_err(|e| sender.failed(e, false))?
            {
                Recv::TimedOut => {
                    log::trace!("[send] timeout; retransmitting seq={}", sender.seq());
                }
                Recv::Datagram(len) => match sender.on_datagram(&reply[..len], Instant::now()) {
                    AckOutcome::Confirmed { latency } => break latency,
                    AckOutcome::Stale(got) => {
                        log::trace!("[send] ← stale ACK seq={got}; retransmitting");
                    }
                    AckOutcome::Unparseable => {
                        log::trace!("[send] ← {len}-byte non-ACK datagram; retransmitting");
                    }
                },
            }
        };

        hook(frame_len, latency);
        *seq = sender.seq();

        if is_eof {
            break;
        }
    }

    let mut report = sender.report();
    report.elapsed = started.elapsed();
    Ok(report)
}

/// Read until `buf` is full or the source is exhausted.  Returns `0` only at
/// end of stream.
async fn fill_chunk<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
