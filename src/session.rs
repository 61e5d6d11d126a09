//! Per-session lifecycle manager.
//!
//! A [`Session`] owns the complete state for one negotiated exchange over a
//! single transport:
//! - The immutable [`SessionParams`] agreed during the handshake.
//! - Two independent alternating bits: the outbound bit of the last frame
//!   this side sent, and the inbound bit of the last frame it accepted.
//! - The current [`Phase`], for logging and error context.
//!
//! Sessions are created either by an active open ([`Session::connect`],
//! client side) or from a grant the server already sent
//! ([`Session::accepted`]).  Send and receive phases run one after another,
//! never concurrently; dropping the session closes the transport.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{SessionParams, TransferConfig};
use crate::error::TransferError;
use crate::frame::{Frame, SeqBit};
use crate::negotiator::{self, HANDSHAKE_SEQ};
use crate::receiver::{self, Receiver};
use crate::report::{ReceiveReport, SendReport};
use crate::sender;
use crate::socket::Transport;
use crate::state::Phase;

/// A negotiated stop-and-wait session over one transport.
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    params: SessionParams,
    /// Bit of the last frame sent.
    outbound: SeqBit,
    /// Bit of the last frame accepted.
    inbound: SeqBit,
    phase: Phase,
    /// HandshakeAck still owed to the client (server side, until the first
    /// inbound frame proves it arrived).
    pending_grant: Option<Vec<u8>>,
}

impl<T: Transport> Session<T> {
    /// Perform the client handshake over `transport`.
    pub async fn connect(transport: T, config: &TransferConfig) -> Result<Self, TransferError> {
        let params = negotiator::negotiate(&transport, config).await?;
        Ok(Self::new(transport, params, None))
    }

    /// Server side: wrap a transport whose peer has been sent `grant`.
    pub fn accepted(transport: T, params: SessionParams, grant: &Frame) -> Self {
        Self::new(transport, params, Some(grant.encode()))
    }

    /// Wrap a transport whose parameters were agreed out of band.
    pub fn established(transport: T, params: SessionParams) -> Self {
        Self::new(transport, params, None)
    }

    fn new(transport: T, params: SessionParams, pending_grant: Option<Vec<u8>>) -> Self {
        Self {
            transport,
            params,
            outbound: HANDSHAKE_SEQ,
            inbound: HANDSHAKE_SEQ,
            phase: Phase::Handshake,
            pending_grant,
        }
    }

    /// Push `source` to the peer.  `hook` is called once per acknowledged
    /// frame with `(frame_len, latency_including_retransmissions)`.
    pub async fn send_stream<R, H>(
        &mut self,
        mut source: R,
        mut hook: H,
    ) -> Result<SendReport, TransferError>
    where
        R: AsyncRead + Unpin,
        H: FnMut(usize, Duration),
    {
        self.phase = Phase::Sending;
        let report = sender::run(
            &self.transport,
            &self.params,
            &mut self.outbound,
            &mut source,
            &mut hook,
        )
        .await?;
        log::info!(
            "[session] sent {} bytes in {} frames ({:.3}s, ~{} dropped)",
            report.bytes_sent,
            report.frames,
            report.elapsed.as_secs_f64(),
            report.dropped_frames()
        );
        Ok(report)
    }

    /// Pull the peer's stream into `sink`.  `hook` is called once per
    /// accepted Data frame with `(datagram_len, time_since_previous_accept)`.
    pub async fn receive_stream<W, H>(
        &mut self,
        mut sink: W,
        mut hook: H,
    ) -> Result<ReceiveReport, TransferError>
    where
        W: AsyncWrite + Unpin,
        H: FnMut(usize, Duration),
    {
        self.phase = Phase::Receiving;
        let receiver = match self.pending_grant.take() {
            Some(grant) => Receiver::replaying(self.inbound, grant),
            None => Receiver::new(self.inbound),
        };
        let mut receiver = receiver.with_frame_limit(self.params.datagram_size() as usize);
        let result = receiver::run(
            &self.transport,
            &self.params,
            &mut receiver,
            &mut sink,
            &mut hook,
        )
        .await;
        self.inbound = receiver.last_accepted();
        let report = result?;
        log::info!(
            "[session] received {} bytes in {} frames ({:.3}s, ~{} ACKs dropped)",
            report.bytes_received,
            report.frames_accepted,
            report.elapsed.as_secs_f64(),
            report.dropped_acks()
        );
        Ok(report)
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bit of the last frame this side sent.
    pub fn outbound_seq(&self) -> SeqBit {
        self.outbound
    }

    /// Bit of the last frame this side accepted.
    pub fn inbound_seq(&self) -> SeqBit {
        self.inbound
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// End the session and hand back the transport.
    pub fn close(self) -> T {
        log::debug!("[session] closed after {} phase", self.phase);
        self.transport
    }
}
