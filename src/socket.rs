//! Datagram transport abstraction.
//!
//! [`Transport`] is the only thing the protocol engines know about the
//! network: send one datagram, or wait for one until a deadline.  Every wait
//! has exactly three outcomes:
//!
//! | Outcome                     | Meaning                                |
//! |-----------------------------|----------------------------------------|
//! | `Ok(Recv::Datagram(n))`     | `n` bytes were written into the buffer |
//! | `Ok(Recv::TimedOut)`        | the deadline passed with no datagram   |
//! | `Err(_)`                    | fatal socket error                     |
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` connected to
//! a single peer.  The in-memory and fault-injecting transports used by the
//! tests live in [`crate::simulator`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Result of one bounded wait for a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// A datagram of this many bytes was received.
    Datagram(usize),
    /// The deadline expired first.
    TimedOut,
}

/// A bidirectional, unreliable, point-to-point datagram channel.
pub trait Transport: Send + Sync {
    /// Send `datagram` to the peer.  Loss is the network's business; an
    /// `Err` here means the socket itself is unusable.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait at most `deadline` for the next datagram and copy it into `buf`.
    /// Datagrams longer than `buf` are truncated.
    fn recv(
        &self,
        buf: &mut [u8],
        deadline: Duration,
    ) -> impl Future<Output = io::Result<Recv>> + Send;
}

/// Largest datagram the server reads before it knows the session size.
pub const MAX_DATAGRAM: usize = 65_535;

/// A UDP socket bound locally and, once a peer is known, connected to it.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Bind an ephemeral port of the matching address family and connect it
    /// to `peer`.
    pub async fn connect(peer: SocketAddr) -> io::Result<Self> {
        let any: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = Self::bind(any).await?;
        socket.inner.connect(peer).await?;
        Ok(socket)
    }

    /// Restrict this socket to datagrams from `peer`.
    pub async fn connect_to(&self, peer: SocketAddr) -> io::Result<()> {
        self.inner.connect(peer).await
    }

    /// Receive one datagram from anyone, with no deadline.  Used by the
    /// server before a session exists.
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

impl Transport for Socket {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.inner.send(datagram).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8], deadline: Duration) -> io::Result<Recv> {
        match timeout(deadline, self.inner.recv(buf)).await {
            Ok(Ok(n)) => Ok(Recv::Datagram(n)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }
}
