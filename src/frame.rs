//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Frame`].  This module is
//! responsible for:
//! - Defining the on-wire ASCII layout of the five frame variants.
//! - Encoding a [`Frame`] into a byte buffer ready for transmission.
//! - Decoding a raw byte slice back into a [`Frame`] of an *expected* kind,
//!   returning [`FrameError`] when the bytes are something else.
//!
//! No I/O happens here; every function is a pure transformation.
//!
//! # Wire format
//!
//! All integers are fixed-width, zero-padded ASCII decimal.
//!
//! ```text
//!  Handshake     'C' seq(1) size(5) timeout_ms(5)     12 bytes
//!  HandshakeAck  'A' seq(1) size(5) timeout_ms(5)     12 bytes
//!  Ack           'A' seq(1)                            2 bytes
//!  Data          'D' seq(1) payload(0..=size-2)        2 + n bytes
//!  Eof           'E' seq(1)                            2 bytes
//! ```
//!
//! `Ack` and `HandshakeAck` share a tag and are told apart by length, which
//! is why decoding always takes the [`FrameKind`] the caller is waiting for.
//! A decode failure is an ordinary outcome on a socket that carries both
//! directions of traffic, not a fault.

use std::fmt;

use thiserror::Error;

/// Length of the `tag + sequence digit` header shared by every frame.
pub const HEADER_LEN: usize = 2;

/// Length of a `Handshake` / `HandshakeAck` frame.
pub const HANDSHAKE_LEN: usize = 12;

/// Largest value representable in a 5-digit numeric field.
pub const MAX_FIELD: u32 = 99_999;

const FIELD_WIDTH: usize = 5;

// Tags.
const TAG_HANDSHAKE: u8 = b'C';
const TAG_ACK: u8 = b'A';
const TAG_DATA: u8 = b'D';
const TAG_EOF: u8 = b'E';

// ---------------------------------------------------------------------------
// SeqBit
// ---------------------------------------------------------------------------

/// The single-bit alternating sequence number (always 0 or 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SeqBit(bool);

impl SeqBit {
    pub const ZERO: SeqBit = SeqBit(false);
    pub const ONE: SeqBit = SeqBit(true);

    /// The other bit.
    #[must_use]
    pub fn toggled(self) -> Self {
        SeqBit(!self.0)
    }

    /// Flip in place (0 ↔ 1).
    pub fn toggle(&mut self) {
        self.0 = !self.0;
    }

    /// Numeric value, 0 or 1.
    pub fn value(self) -> u8 {
        u8::from(self.0)
    }

    fn to_ascii(self) -> u8 {
        b'0' + self.value()
    }

    fn from_ascii(byte: u8) -> Result<Self, FrameError> {
        match byte {
            b'0' => Ok(SeqBit::ZERO),
            b'1' => Ok(SeqBit::ONE),
            other => Err(FrameError::BadSequence(other)),
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Discriminant used to tell [`Frame::decode`] what the caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Handshake,
    HandshakeAck,
    Ack,
    Data,
    Eof,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Handshake => "HANDSHAKE",
            FrameKind::HandshakeAck => "HANDSHAKE-ACK",
            FrameKind::Ack => "ACK",
            FrameKind::Data => "DATA",
            FrameKind::Eof => "EOF",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client → server session request.
    Handshake {
        seq: SeqBit,
        size: u32,
        timeout_ms: u32,
    },
    /// Server → client grant; the server's values are authoritative.
    HandshakeAck {
        seq: SeqBit,
        size: u32,
        timeout_ms: u32,
    },
    /// Acknowledges the Data or Eof frame carrying the same `seq`.
    Ack { seq: SeqBit },
    /// One chunk of the byte stream.
    Data { seq: SeqBit, payload: Vec<u8> },
    /// End of stream for the current direction.
    Eof { seq: SeqBit },
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Handshake { .. } => FrameKind::Handshake,
            Frame::HandshakeAck { .. } => FrameKind::HandshakeAck,
            Frame::Ack { .. } => FrameKind::Ack,
            Frame::Data { .. } => FrameKind::Data,
            Frame::Eof { .. } => FrameKind::Eof,
        }
    }

    pub fn seq(&self) -> SeqBit {
        match self {
            Frame::Handshake { seq, .. }
            | Frame::HandshakeAck { seq, .. }
            | Frame::Ack { seq }
            | Frame::Data { seq, .. }
            | Frame::Eof { seq } => *seq,
        }
    }

    /// Number of bytes [`Frame::encode`] will produce.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Handshake { .. } | Frame::HandshakeAck { .. } => HANDSHAKE_LEN,
            Frame::Data { payload, .. } => HEADER_LEN + payload.len(),
            Frame::Ack { .. } | Frame::Eof { .. } => HEADER_LEN,
        }
    }

    /// Serialise this frame into a newly allocated byte vector.
    ///
    /// Handshake fields must not exceed [`MAX_FIELD`]; configuration
    /// validation guarantees this before a handshake frame is ever built.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self {
            Frame::Handshake {
                seq,
                size,
                timeout_ms,
            } => encode_handshake(&mut buf, TAG_HANDSHAKE, *seq, *size, *timeout_ms),
            Frame::HandshakeAck {
                seq,
                size,
                timeout_ms,
            } => encode_handshake(&mut buf, TAG_ACK, *seq, *size, *timeout_ms),
            Frame::Ack { seq } => buf.extend_from_slice(&[TAG_ACK, seq.to_ascii()]),
            Frame::Data { seq, payload } => {
                buf.extend_from_slice(&[TAG_DATA, seq.to_ascii()]);
                buf.extend_from_slice(payload);
            }
            Frame::Eof { seq } => buf.extend_from_slice(&[TAG_EOF, seq.to_ascii()]),
        }
        buf
    }

    /// Parse `buf` as a frame of kind `expected`.
    ///
    /// Returns [`Err`] if the length, tag, sequence digit, or a numeric field
    /// does not match the layout of `expected`.
    pub fn decode(buf: &[u8], expected: FrameKind) -> Result<Self, FrameError> {
        match expected {
            FrameKind::Handshake | FrameKind::HandshakeAck => {
                check_len(buf, HANDSHAKE_LEN)?;
                let tag = if expected == FrameKind::Handshake {
                    TAG_HANDSHAKE
                } else {
                    TAG_ACK
                };
                check_tag(buf, tag)?;
                let seq = SeqBit::from_ascii(buf[1])?;
                let size = parse_field(&buf[2..2 + FIELD_WIDTH])?;
                let timeout_ms = parse_field(&buf[2 + FIELD_WIDTH..HANDSHAKE_LEN])?;
                Ok(if expected == FrameKind::Handshake {
                    Frame::Handshake {
                        seq,
                        size,
                        timeout_ms,
                    }
                } else {
                    Frame::HandshakeAck {
                        seq,
                        size,
                        timeout_ms,
                    }
                })
            }
            FrameKind::Ack => {
                check_len(buf, HEADER_LEN)?;
                check_tag(buf, TAG_ACK)?;
                Ok(Frame::Ack {
                    seq: SeqBit::from_ascii(buf[1])?,
                })
            }
            FrameKind::Eof => {
                check_len(buf, HEADER_LEN)?;
                check_tag(buf, TAG_EOF)?;
                Ok(Frame::Eof {
                    seq: SeqBit::from_ascii(buf[1])?,
                })
            }
            FrameKind::Data => {
                if buf.len() < HEADER_LEN {
                    return Err(FrameError::WrongLength {
                        expected: HEADER_LEN,
                        actual: buf.len(),
                    });
                }
                check_tag(buf, TAG_DATA)?;
                Ok(Frame::Data {
                    seq: SeqBit::from_ascii(buf[1])?,
                    payload: buf[HEADER_LEN..].to_vec(),
                })
            }
        }
    }
}

/// Borrowing view of an inbound Data/Eof datagram, used on the receive path
/// to avoid copying payloads that may turn out to be duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Data { seq: SeqBit, payload: &'a [u8] },
    Eof { seq: SeqBit },
}

impl<'a> Inbound<'a> {
    /// Try Data first, then Eof; anything else is `None`.
    pub fn classify(buf: &'a [u8]) -> Option<Self> {
        if buf.len() >= HEADER_LEN && buf[0] == TAG_DATA {
            let seq = SeqBit::from_ascii(buf[1]).ok()?;
            return Some(Inbound::Data {
                seq,
                payload: &buf[HEADER_LEN..],
            });
        }
        match Frame::decode(buf, FrameKind::Eof) {
            Ok(frame) => Some(Inbound::Eof { seq: frame.seq() }),
            Err(_) => None,
        }
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("expected a {expected}-byte frame, got {actual} bytes")]
    WrongLength { expected: usize, actual: usize },
    #[error("expected tag {:?}, found {:?}", tag_char(.expected), tag_char(.found))]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("sequence digit must be '0' or '1', found byte {0:#04x}")]
    BadSequence(u8),
    #[error("numeric field is not zero-padded ASCII decimal")]
    BadNumber,
}

fn tag_char(byte: &u8) -> char {
    char::from(*byte)
}

fn encode_handshake(buf: &mut Vec<u8>, tag: u8, seq: SeqBit, size: u32, timeout_ms: u32) {
    debug_assert!(size <= MAX_FIELD && timeout_ms <= MAX_FIELD);
    buf.push(tag);
    buf.push(seq.to_ascii());
    buf.extend_from_slice(format!("{size:05}{timeout_ms:05}").as_bytes());
}

fn check_len(buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() != expected {
        return Err(FrameError::WrongLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn check_tag(buf: &[u8], expected: u8) -> Result<(), FrameError> {
    if buf[0] != expected {
        return Err(FrameError::UnexpectedTag {
            expected,
            found: buf[0],
        });
    }
    Ok(())
}

fn parse_field(digits: &[u8]) -> Result<u32, FrameError> {
    digits.iter().try_fold(0u32, |acc, &b| {
        if b.is_ascii_digit() {
            Ok(acc * 10 + u32::from(b - b'0'))
        } else {
            Err(FrameError::BadNumber)
        }
    })
}
