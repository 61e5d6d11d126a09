//! In-memory and fault-injecting transports.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides:
//!
//! - [`MemoryTransport`]: a connected pair of endpoints backed by tokio
//!   channels.  Works under tokio's paused clock, so timeouts are instant
//!   and deterministic.
//! - [`Lossy`]: wraps any [`Transport`] and applies a [`FaultPlan`] to
//!   outbound datagrams:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Scripted drop    | Drop the n-th outbound datagram (0-based).         |
//! | Random loss      | Drop a datagram with probability `loss_rate`.      |
//! | Duplication      | Deliver a datagram twice with `duplicate_rate`.    |
//! | Scripted reorder | Hold the n-th outbound datagram back.              |
//! | Random reorder   | Hold a datagram back with `reorder_rate`.          |
//!
//! A held datagram is released right after the next datagram that does get
//! delivered, so it reaches the peer late and out of order.  A hold with
//! nothing sent after it behaves like a drop.
//! Randomness comes from a seeded `StdRng` so failures are reproducible.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::socket::{Recv, Transport};

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One end of an in-process datagram link.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Two endpoints; whatever one sends the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
        )
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "peer endpoint dropped"))
    }

    async fn recv(&self, buf: &mut [u8], deadline: Duration) -> io::Result<Recv> {
        let mut rx = self.rx.lock().await;
        match timeout(deadline, rx.recv()).await {
            Ok(Some(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Recv::Datagram(n))
            }
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "peer endpoint closed",
            )),
            Err(_elapsed) => Ok(Recv::TimedOut),
        }
    }
}

// ---------------------------------------------------------------------------
// Lossy
// ---------------------------------------------------------------------------

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Outbound datagram indices (0-based, counting every send) to drop.
    pub drop_sends: HashSet<usize>,
    /// Probability that any other datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a delivered datagram is sent twice.
    pub duplicate_rate: f64,
    /// Outbound datagram indices to hold back behind the next delivery.
    pub reorder_sends: HashSet<usize>,
    /// Probability that any other datagram is held back.
    pub reorder_rate: f64,
    /// RNG seed.
    pub seed: u64,
}

impl FaultPlan {
    /// Drop exactly the listed outbound datagrams and nothing else.
    pub fn drop_nth<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            drop_sends: indices.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Deliver the listed outbound datagrams after the one that follows them.
    pub fn reorder_nth<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            reorder_sends: indices.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Random loss and duplication with a fixed seed.
    pub fn random(loss_rate: f64, duplicate_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            duplicate_rate,
            seed,
            ..Self::default()
        }
    }
}

enum Fate {
    Drop,
    Hold,
    Deliver,
    Duplicate,
}

/// A fault-injecting wrapper around another transport.
#[derive(Debug)]
pub struct Lossy<T> {
    inner: T,
    plan: FaultPlan,
    rng: Mutex<StdRng>,
    /// Datagrams waiting for the next delivery.
    held: Mutex<Vec<Vec<u8>>>,
    sends: AtomicUsize,
    dropped: AtomicUsize,
    reordered: AtomicUsize,
}

impl<T: Transport> Lossy<T> {
    pub fn new(inner: T, plan: FaultPlan) -> Self {
        let rng = Mutex::new(StdRng::seed_from_u64(plan.seed));
        Self {
            inner,
            plan,
            rng,
            held: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            reordered: AtomicUsize::new(0),
        }
    }

    /// Outbound datagrams offered so far, dropped ones included.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::Relaxed)
    }

    /// Outbound datagrams discarded so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Outbound datagrams held back and delivered out of order.
    pub fn reordered(&self) -> usize {
        self.reordered.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn fate(&self, index: usize) -> Fate {
        if self.plan.drop_sends.contains(&index) {
            return Fate::Drop;
        }
        if self.plan.reorder_sends.contains(&index) {
            return Fate::Hold;
        }
        // A poisoned lock only means another sender panicked mid-draw; the
        // RNG state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if self.plan.loss_rate > 0.0 && rng.random_bool(self.plan.loss_rate.min(1.0)) {
            Fate::Drop
        } else if self.plan.reorder_rate > 0.0 && rng.random_bool(self.plan.reorder_rate.min(1.0)) {
            Fate::Hold
        } else if self.plan.duplicate_rate > 0.0 && rng.random_bool(self.plan.duplicate_rate.min(1.0))
        {
            Fate::Duplicate
        } else {
            Fate::Deliver
        }
    }
}

impl<T: Transport> Lossy<T> {
    fn lock_held(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn release_held(&self) -> io::Result<()> {
        let held = std::mem::take(&mut *self.lock_held());
        for datagram in held {
            log::trace!("[sim] releasing held {}-byte datagram", datagram.len());
            self.inner.send(&datagram).await?;
        }
        Ok(())
    }
}

impl<T: Transport> Transport for Lossy<T> {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let index = self.sends.fetch_add(1, Ordering::Relaxed);
        match self.fate(index) {
            Fate::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("[sim] dropped datagram #{index} ({} bytes)", datagram.len());
                Ok(())
            }
            Fate::Hold => {
                self.reordered.fetch_add(1, Ordering::Relaxed);
                log::trace!("[sim] holding datagram #{index} back");
                self.lock_held().push(datagram.to_vec());
                Ok(())
            }
            Fate::Deliver => {
                self.inner.send(datagram).await?;
                self.release_held().await
            }
            Fate::Duplicate => {
                log::trace!("[sim] duplicated datagram #{index}");
                self.inner.send(datagram).await?;
                self.inner.send(datagram).await?;
                self.release_held().await
            }
        }
    }

    async fn recv(&self, buf: &mut [u8], deadline: Duration) -> io::Result<Recv> {
        self.inner.recv(buf, deadline).await
    }
}
