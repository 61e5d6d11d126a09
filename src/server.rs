//! Echo peer.
//!
//! The counterpart a client talks to: accept one Handshake, grant
//! parameters under a [`GrantPolicy`], receive the client's stream into
//! memory, and send it straight back over the same session.  Sessions are
//! served one at a time on the same local port.

use std::io;
use std::net::SocketAddr;

use crate::config::{GrantPolicy, SessionParams};
use crate::error::{Progress, TransferError};
use crate::negotiator;
use crate::report::{ReceiveReport, SendReport};
use crate::session::Session;
use crate::socket::{Socket, Transport, MAX_DATAGRAM};
use crate::state::Phase;

/// Summary of one served session.
#[derive(Debug, Clone)]
pub struct EchoReport {
    pub peer: SocketAddr,
    pub params: SessionParams,
    pub received: ReceiveReport,
    pub sent: SendReport,
}

pub struct Server {
    local_addr: SocketAddr,
    /// Idle listening socket; `None` while a session owns it.
    socket: Option<Socket>,
    policy: GrantPolicy,
}

impl Server {
    pub async fn bind(addr: SocketAddr, policy: GrantPolicy) -> Result<Self, TransferError> {
        policy.validate()?;
        let socket = Socket::bind(addr)
            .await
            .map_err(|source| TransferError::Bind { addr, source })?;
        Ok(Self {
            local_addr: socket.local_addr,
            socket: Some(socket),
            policy,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve exactly one client from handshake to echoed Eof.
    pub async fn serve_once(&mut self) -> Result<EchoReport, TransferError> {
        // A connected socket cannot be un-connected, so each session after
        // the first rebinds the same port.
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => Socket::bind(self.local_addr)
                .await
                .map_err(|source| TransferError::Bind {
                    addr: self.local_addr,
                    source,
                })?,
        };

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (grant, peer) = loop {
            let (n, peer) = socket.recv_from(&mut buf).await.map_err(handshake_failed)?;
            match negotiator::grant(&buf[..n], &self.policy) {
                Some(grant) => break (grant, peer),
                None => log::trace!("[server] ignoring {n}-byte datagram from {peer}"),
            }
        };

        socket.connect_to(peer).await.map_err(handshake_failed)?;
        socket
            .send(&grant.reply.encode())
            .await
            .map_err(handshake_failed)?;
        log::info!(
            "[server] session with {peer}: datagram size {} bytes, timeout {} ms",
            grant.params.datagram_size(),
            grant.params.timeout_ms()
        );

        let mut session = Session::accepted(socket, grant.params, &grant.reply);
        let mut echo = Vec::new();
        let received = session.receive_stream(&mut echo, |_, _| {}).await?;
        let sent = session.send_stream(&echo[..], |_, _| {}).await?;
        session.close();

        Ok(EchoReport {
            peer,
            params: grant.params,
            received,
            sent,
        })
    }

    /// Serve sessions until the listening port cannot be bound again.
    ///
    /// Any other failure belongs to one peer (a socket error while granting,
    /// an exhausted retry budget, ...): it is logged and the next client is
    /// accepted.
    pub async fn run(mut self) -> Result<(), TransferError> {
        loop {
            match self.serve_once().await {
                Ok(report) => log::info!(
                    "[server] echoed {} bytes to {}",
                    report.sent.bytes_sent,
                    report.peer
                ),
                Err(e @ TransferError::Bind { .. }) => return Err(e),
                Err(e) => log::warn!("[server] session failed: {e}"),
            }
        }
    }
}

fn handshake_failed(source: io::Error) -> TransferError {
    TransferError::Transport {
        phase: Phase::Handshake,
        progress: Progress::default(),
        source,
    }
}
