//! `rdt-udp` — stop-and-wait reliable file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  Handshake / HandshakeAck  ┌────────────┐
//!  │ negotiator │◀──────────────────────────▶│   server   │
//!  └─────┬──────┘                            └─────┬──────┘
//!        │ SessionParams                           │
//!  ┌─────▼──────────────────────────────────────────▼─────┐
//!  │                      Session                         │
//!  │   (owns transport, both sequence bits, the phase)    │
//!  └─────┬────────────────────────────────────────┬───────┘
//!        │ Data / Eof ──▶            ◀── Ack      │
//!  ┌─────▼─────┐                            ┌─────▼─────┐
//!  │  Sender   │                            │ Receiver  │
//!  └─────┬─────┘                            └─────┬─────┘
//!        │           raw datagrams                │
//!  ┌─────▼────────────────────────────────────────▼─────┐
//!  │   Transport: Socket (UDP) │ MemoryTransport │ Lossy │
//!  └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`frame`]       — wire format (encode / decode, alternating bit)
//! - [`config`]      — requested, granted, and effective parameters
//! - [`negotiator`]  — idempotent handshake, both halves
//! - [`sender`]      — stop-and-wait outbound state machine and loop
//! - [`receiver`]    — duplicate-suppressing inbound state machine and loop
//! - [`session`]     — per-session lifecycle over one transport
//! - [`server`]      — echo peer serving one session at a time
//! - [`state`]       — session phase labels
//! - [`report`]      — per-phase transfer statistics
//! - [`rtt`]         — background RTT sample recorder
//! - [`error`]       — error type carrying phase and progress
//! - [`simulator`]   — in-memory and lossy transports for testing
//! - [`socket`]      — transport trait and async UDP socket

pub mod config;
pub mod error;
pub mod frame;
pub mod negotiator;
pub mod receiver;
pub mod report;
pub mod rtt;
pub mod sender;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::{GrantPolicy, SessionParams, TransferConfig};
pub use error::{Progress, TransferError};
pub use frame::{Frame, FrameKind, SeqBit};
pub use report::{ReceiveReport, SendReport};
pub use server::Server;
pub use session::Session;
pub use socket::{Recv, Socket, Transport};
