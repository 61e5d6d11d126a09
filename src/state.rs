//! Session phase types.
//!
//! A [`crate::session::Session`] moves through a short, linear lifecycle:
//!
//! ```text
//!  Handshake ──HandshakeAck──▶ Sending ──Eof acked──▶ Receiving ──Eof──▶ (closed)
//! ```
//!
//! Receiving before (or instead of) sending is also legal; the phases only
//! label what the session is doing so that errors and log lines can say
//! where a transfer failed.

use std::fmt;

/// What a session is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Negotiating size and timeout with the peer.
    #[default]
    Handshake,
    /// Pushing a byte stream out.
    Sending,
    /// Pulling a byte stream in.
    Receiving,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Handshake => "handshake",
            Phase::Sending => "send",
            Phase::Receiving => "receive",
        };
        f.write_str(name)
    }
}
