//! Session parameters: what the client asks for, what the server grants,
//! and what both sides end up using.

use std::time::Duration;

use crate::error::TransferError;
use crate::frame::{HEADER_LEN, MAX_FIELD};

/// Smallest datagram that still carries one payload byte.
pub const MIN_DATAGRAM_SIZE: u32 = HEADER_LEN as u32 + 1;

/// Retransmissions allowed per frame after its first transmission.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Client-side request, supplied at negotiation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Requested retransmission timeout in milliseconds.
    pub timeout_ms: u32,
    /// Requested datagram size in bytes, header included.
    pub datagram_size: u32,
    /// Retransmissions allowed per frame (handshake included) before the
    /// operation is abandoned.
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            datagram_size: 1024,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TransferConfig {
    pub fn new(timeout_ms: u32, datagram_size: u32) -> Self {
        Self {
            timeout_ms,
            datagram_size,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Reject values that cannot be written into a handshake frame.
    pub fn validate(&self) -> Result<(), TransferError> {
        check_size(self.datagram_size).map_err(TransferError::InvalidConfig)?;
        check_timeout(self.timeout_ms).map_err(TransferError::InvalidConfig)?;
        Ok(())
    }
}

/// Server-side rule turning a requested size/timeout into a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPolicy {
    /// Upper bound on the granted datagram size.
    pub max_datagram_size: u32,
    /// Fixed timeout to impose; `None` honours the client's request.
    pub timeout_ms: Option<u32>,
    /// Retransmission budget the server applies to its own frames.
    pub max_retries: u32,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            max_datagram_size: 65_000,
            timeout_ms: None,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GrantPolicy {
    /// Deterministic: the same request always yields the same grant.
    pub fn grant(&self, requested_size: u32, requested_timeout_ms: u32) -> (u32, u32) {
        let size = requested_size
            .min(self.max_datagram_size)
            .clamp(MIN_DATAGRAM_SIZE, MAX_FIELD);
        let timeout = self
            .timeout_ms
            .unwrap_or(requested_timeout_ms)
            .clamp(1, MAX_FIELD);
        (size, timeout)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        check_size(self.max_datagram_size).map_err(TransferError::InvalidConfig)?;
        if let Some(timeout_ms) = self.timeout_ms {
            check_timeout(timeout_ms).map_err(TransferError::InvalidConfig)?;
        }
        Ok(())
    }
}

/// The negotiated, immutable parameters of one session.
///
/// Only [`SessionParams::from_grant`] builds one, so the datagram size
/// always leaves room for at least one payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    datagram_size: u32,
    timeout: Duration,
    max_retries: u32,
}

impl SessionParams {
    /// Build from values granted by a peer, rejecting unusable ones.
    pub fn from_grant(size: u32, timeout_ms: u32, max_retries: u32) -> Result<Self, TransferError> {
        if check_size(size).is_err() || check_timeout(timeout_ms).is_err() {
            return Err(TransferError::InvalidGrant { size, timeout_ms });
        }
        Ok(Self {
            datagram_size: size,
            timeout: Duration::from_millis(u64::from(timeout_ms)),
            max_retries,
        })
    }

    /// Same session, but waiting `timeout` at every read instead of the
    /// granted value.  A peer may keep a longer local deadline than it
    /// granted.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Effective datagram size, header included.
    pub fn datagram_size(&self) -> u32 {
        self.datagram_size
    }

    /// Effective read deadline for every wait-for-frame step.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retransmission budget per frame.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Payload bytes that fit in one Data frame.
    pub fn payload_capacity(&self) -> usize {
        (self.datagram_size as usize).saturating_sub(HEADER_LEN)
    }

    pub fn timeout_ms(&self) -> u32 {
        u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX)
    }
}

fn check_size(size: u32) -> Result<(), String> {
    if !(MIN_DATAGRAM_SIZE..=MAX_FIELD).contains(&size) {
        return Err(format!(
            "datagram size {size} outside {MIN_DATAGRAM_SIZE}..={MAX_FIELD} bytes"
        ));
    }
    Ok(())
}

fn check_timeout(timeout_ms: u32) -> Result<(), String> {
    if !(1..=MAX_FIELD).contains(&timeout_ms) {
        return Err(format!("timeout {timeout_ms} ms outside 1..={MAX_FIELD} ms"));
    }
    Ok(())
}
