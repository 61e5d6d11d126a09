//! Fatal transfer errors.
//!
//! Only conditions that end a transfer live here.  Timeouts, unparseable
//! datagrams, and sequence mismatches during data transfer are handled by
//! the engines themselves and never surface.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::frame::SeqBit;
use crate::state::Phase;

/// How far a transfer got before it failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Payload bytes confirmed so far.
    pub bytes: u64,
    /// Lower-bound estimate of dropped frames (or acks) so far.
    pub loss_estimate: u64,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes transferred, ~{} dropped",
            self.bytes, self.loss_estimate
        )
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("handshake not acknowledged after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },

    #[error("handshake sequence mismatch: expected {expected}, received {received}")]
    SequenceViolation { expected: SeqBit, received: SeqBit },

    #[error("server granted unusable parameters: size {size} bytes, timeout {timeout_ms} ms")]
    InvalidGrant { size: u32, timeout_ms: u32 },

    #[error("{phase} phase gave up after {attempts} transmissions of one frame ({progress})")]
    RetriesExhausted {
        phase: Phase,
        attempts: u32,
        progress: Progress,
    },

    #[error("{phase} phase socket error ({progress}): {source}")]
    Transport {
        phase: Phase,
        progress: Progress,
        #[source]
        source: io::Error,
    },

    #[error("{phase} phase stream error ({progress}): {source}")]
    Stream {
        phase: Phase,
        progress: Progress,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl TransferError {
    /// Progress recorded at the point of failure, if the error carries any.
    pub fn progress(&self) -> Option<Progress> {
        match self {
            TransferError::RetriesExhausted { progress, .. }
            | TransferError::Transport { progress, .. }
            | TransferError::Stream { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    /// Phase in which the error occurred.
    pub fn phase(&self) -> Phase {
        match self {
            TransferError::RetriesExhausted { phase, .. }
            | TransferError::Transport { phase, .. }
            | TransferError::Stream { phase, .. } => *phase,
            _ => Phase::Handshake,
        }
    }
}
