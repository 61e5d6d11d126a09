//! Entry point for `rdt-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, files, and the final summary).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rdt_udp::config::DEFAULT_MAX_RETRIES;
use rdt_udp::rtt::{RttRecorder, RttSummary};
use rdt_udp::simulator::{FaultPlan, Lossy};
use rdt_udp::{
    GrantPolicy, ReceiveReport, SendReport, Server, Session, Socket, TransferConfig, Transport,
};
use tokio::fs::File;

/// Stop-and-wait reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Echo every received file back to its sender.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Largest datagram size the server will grant.
        #[arg(long, default_value_t = 65_000)]
        max_datagram_size: u32,
        /// Timeout to impose on every session instead of the client's request.
        #[arg(long)]
        timeout_ms: Option<u32>,
        /// Retransmissions per frame before a session is abandoned.
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
    },
    /// Send INPUT to the server and write the echo to OUTPUT.
    Client(ClientArgs),
}

#[derive(clap::Args)]
struct ClientArgs {
    /// Requested retransmission timeout in milliseconds.
    timeout_ms: u32,
    /// Requested datagram size in bytes, header included.
    datagram_size: u32,
    /// File to send.
    input: PathBuf,
    /// File the echoed stream is written to.
    output: PathBuf,
    /// Server host name or address.
    host: String,
    /// Server UDP port.
    port: u16,
    /// Write per-frame timings to sendRTTs.csv and recvRTTs.csv.
    #[arg(short, long)]
    record_rtts: bool,
    /// Retransmissions per frame before the transfer is abandoned.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,
    /// Drop this fraction of outbound datagrams (testing aid).
    #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
    loss_rate: f64,
    /// Seed for --loss-rate.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            max_datagram_size,
            timeout_ms,
            max_retries,
        } => {
            let policy = GrantPolicy {
                max_datagram_size,
                timeout_ms,
                max_retries,
            };
            let server = Server::bind(bind, policy)
                .await
                .with_context(|| format!("cannot listen on {bind}"))?;
            log::info!("Starting server on {}", server.local_addr());
            server.run().await?;
        }
        Mode::Client(args) => {
            let peer = tokio::net::lookup_host((args.host.as_str(), args.port))
                .await
                .with_context(|| format!("cannot resolve {}:{}", args.host, args.port))?
                .next()
                .with_context(|| format!("{} has no address", args.host))?;
            log::info!("Starting client, connecting to {peer}");
            let socket = Socket::connect(peer)
                .await
                .with_context(|| format!("cannot open a socket towards {peer}"))?;

            if args.loss_rate > 0.0 {
                let plan = FaultPlan::random(args.loss_rate, 0.0, args.seed);
                run_client(Lossy::new(socket, plan), &args).await?;
            } else {
                run_client(socket, &args).await?;
            }
        }
    }
    Ok(())
}

async fn run_client<T: Transport>(transport: T, args: &ClientArgs) -> Result<()> {
    let config =
        TransferConfig::new(args.timeout_ms, args.datagram_size).with_max_retries(args.max_retries);
    let mut session = Session::connect(transport, &config)
        .await
        .context("handshake failed")?;
    let params = *session.params();
    println!(
        "negotiated datagram size {} bytes, timeout {} ms",
        params.datagram_size(),
        params.timeout_ms()
    );

    let send_rtts = recorder(args.record_rtts, "sendRTTs.csv").await?;
    let recv_rtts = recorder(args.record_rtts, "recvRTTs.csv").await?;

    let input = File::open(&args.input)
        .await
        .with_context(|| format!("cannot open {}", args.input.display()))?;
    let sent = session
        .send_stream(input, hook(send_rtts.as_ref()))
        .await
        .with_context(|| format!("sending {} failed", args.input.display()))?;

    let output = File::create(&args.output)
        .await
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    let received = session
        .receive_stream(output, hook(recv_rtts.as_ref()))
        .await
        .with_context(|| format!("receiving into {} failed", args.output.display()))?;

    print_send(&sent);
    print_receive(&received);
    if let Some(recorder) = send_rtts {
        print_rtts("send", &recorder.finish().await?);
    }
    if let Some(recorder) = recv_rtts {
        print_rtts("receive", &recorder.finish().await?);
    }
    session.close();
    Ok(())
}

async fn recorder(enabled: bool, path: &str) -> Result<Option<RttRecorder>> {
    if !enabled {
        return Ok(None);
    }
    let recorder = RttRecorder::spawn(Path::new(path))
        .await
        .with_context(|| format!("cannot create {path}"))?;
    Ok(Some(recorder))
}

fn hook(recorder: Option<&RttRecorder>) -> Box<dyn FnMut(usize, Duration) + Send> {
    match recorder {
        Some(recorder) => Box::new(recorder.hook()),
        None => Box::new(|_, _| {}),
    }
}

fn print_send(report: &SendReport) {
    println!(
        "sent {} bytes in {} frames, {:.3}s, {:.0} B/s, ~{} frames dropped",
        report.bytes_sent,
        report.frames,
        report.elapsed.as_secs_f64(),
        report.throughput(),
        report.dropped_frames()
    );
}

fn print_receive(report: &ReceiveReport) {
    println!(
        "received {} bytes in {} frames, {:.3}s, {:.0} B/s, ~{} ACKs dropped",
        report.bytes_received,
        report.frames_accepted,
        report.elapsed.as_secs_f64(),
        report.throughput(),
        report.dropped_acks()
    );
}

fn print_rtts(label: &str, summary: &RttSummary) {
    let (Some(min), Some(max), Some(mean)) = (summary.min, summary.max, summary.mean()) else {
        println!("{label} RTTs: no samples");
        return;
    };
    println!(
        "{label} RTTs: {} samples, min {:.6}s, mean {:.6}s, max {:.6}s",
        summary.count,
        min.as_secs_f64(),
        mean.as_secs_f64(),
        max.as_secs_f64()
    );
}

fn parse_probability(s: &str) -> Result<f64> {
    let p: f64 = s.parse().with_context(|| format!("{s} is not a number"))?;
    if !(0.0..=1.0).contains(&p) {
        bail!("{p} is not within 0.0..=1.0");
    }
    Ok(p)
}
