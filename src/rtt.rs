//! Round-trip time recording.
//!
//! [`RttRecorder`] is a single-producer/single-consumer pipeline: the timing
//! hook handed to a send or receive phase pushes `(bytes, rtt)` samples onto
//! an unbounded channel, and a background task appends them to a CSV file
//! while folding them into an [`RttSummary`].  The protocol loop never waits
//! on disk I/O.
//!
//! The CSV has a `size_bytes,rtt_seconds` header and one row per sample with
//! the duration in seconds to six decimals.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const CSV_HEADER: &str = "size_bytes,rtt_seconds";

/// One timing sample from a send or receive phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttSample {
    pub bytes: usize,
    pub rtt: Duration,
}

/// Aggregate statistics over every recorded sample.
///
/// `srtt` and `rttvar` follow the RFC 6298 §2 estimator:
/// the first sample sets `SRTT = R, RTTVAR = R/2`; later ones apply
/// `RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|` then `SRTT = 7/8·SRTT + 1/8·R`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RttSummary {
    pub count: usize,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    total: Duration,
    pub srtt: Option<Duration>,
    pub rttvar: Option<Duration>,
}

impl RttSummary {
    pub fn record(&mut self, sample: Duration) {
        self.count += 1;
        self.total += sample;
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));

        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
    }

    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.count).ok().filter(|&c| c > 0)?;
        Some(self.total / count)
    }

    /// Retransmission timeout the estimator suggests: `SRTT + 4·RTTVAR`.
    pub fn suggested_timeout(&self) -> Option<Duration> {
        Some(self.srtt? + self.rttvar? * 4)
    }
}

/// Background CSV writer fed by a timing hook.
pub struct RttRecorder {
    tx: mpsc::UnboundedSender<RttSample>,
    handle: JoinHandle<io::Result<RttSummary>>,
}

impl RttRecorder {
    /// Create (truncate) `path` and start the consumer task.
    pub async fn spawn(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        log::debug!("[rtt] recording to {}", path.display());
        let handle = tokio::spawn(write_samples(BufWriter::new(file), rx));
        Ok(Self { tx, handle })
    }

    /// A timing hook for [`crate::session::Session::send_stream`] or
    /// [`crate::session::Session::receive_stream`].
    pub fn hook(&self) -> impl FnMut(usize, Duration) + Send + 'static {
        let tx = self.tx.clone();
        move |bytes, rtt| {
            // The consumer only goes away after finish(); nothing to report.
            let _ = tx.send(RttSample { bytes, rtt });
        }
    }

    /// Close the queue and wait for every queued sample to reach disk.
    ///
    /// Hooks obtained from [`RttRecorder::hook`] must be dropped first, or
    /// this waits for them.
    pub async fn finish(self) -> io::Result<RttSummary> {
        drop(self.tx);
        self.handle.await.map_err(io::Error::other)?
    }
}

async fn write_samples(
    mut out: BufWriter<File>,
    mut rx: mpsc::UnboundedReceiver<RttSample>,
) -> io::Result<RttSummary> {
    let mut summary = RttSummary::default();
    out.write_all(format!("{CSV_HEADER}\n").as_bytes()).await?;
    while let Some(sample) = rx.recv().await {
        summary.record(sample.rtt);
        let row = format!("{},{:.6}\n", sample.bytes, sample.rtt.as_secs_f64());
        out.write_all(row.as_bytes()).await?;
    }
    out.flush().await?;
    Ok(summary)
}
