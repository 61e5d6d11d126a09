//! Per-direction transfer accounting.
//!
//! Loss figures are lower-bound estimates derived from attempt/confirmation
//! deltas.  Retransmitted duplicates inflate the attempt count without a
//! one-to-one loss behind them, so treat the numbers as approximations.

use std::time::Duration;

use crate::error::Progress;

/// Outcome of one completed send phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    /// Payload bytes acknowledged by the peer (headers excluded).
    pub bytes_sent: u64,
    /// Logical frames delivered: every Data chunk plus the final Eof.
    pub frames: u64,
    /// Datagrams put on the wire, retransmissions included.
    pub frames_transmitted: u64,
    /// Datagrams that parsed as an Ack, stale ones included.
    pub acks_received: u64,
    pub elapsed: Duration,
}

impl SendReport {
    pub fn dropped_frames(&self) -> u64 {
        self.frames_transmitted.saturating_sub(self.acks_received)
    }

    /// Payload bytes per second.
    pub fn throughput(&self) -> f64 {
        rate(self.bytes_sent, self.elapsed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            bytes: self.bytes_sent,
            loss_estimate: self.dropped_frames(),
        }
    }
}

/// Outcome of one completed receive phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Payload bytes written to the sink.
    pub bytes_received: u64,
    /// Data datagrams seen, duplicates included.
    pub data_frames_received: u64,
    /// Data frames accepted exactly once.
    pub frames_accepted: u64,
    /// Whether the terminating Eof was accepted.
    pub eof_received: bool,
    /// Ack datagrams put on the wire, resends included.
    pub acks_sent: u64,
    pub elapsed: Duration,
}

impl ReceiveReport {
    pub fn dropped_acks(&self) -> u64 {
        let confirmed = self.frames_accepted + u64::from(self.eof_received);
        self.acks_sent.saturating_sub(confirmed)
    }

    /// Payload bytes per second.
    pub fn throughput(&self) -> f64 {
        rate(self.bytes_received, self.elapsed)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            bytes: self.bytes_received,
            loss_estimate: self.dropped_acks(),
        }
    }
}

fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}
