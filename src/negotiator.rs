//! Connection handshake.
//!
//! ```text
//!  client                                   server
//!    │ ── C0 <size:5> <timeout:5> ──────────▶ │
//!    │                                        │  grant = policy(size, timeout)
//!    │ ◀────────── A0 <size:5> <timeout:5> ── │
//! ```
//!
//! The handshake is idempotent: on timeout the client resends the identical
//! frame (same sequence bit), and the server answers every copy with the
//! same grant.  The server's values are authoritative; the client adopts
//! them even when they differ from its request.

use std::io;
use std::time::Duration;

use crate::config::{GrantPolicy, SessionParams, TransferConfig};
use crate::error::{Progress, TransferError};
use crate::frame::{Frame, FrameKind, SeqBit, HANDSHAKE_LEN};
use crate::socket::{Recv, Transport};
use crate::state::Phase;

/// Sequence bit carried by every handshake.
pub const HANDSHAKE_SEQ: SeqBit = SeqBit::ZERO;

/// Run the client half of the handshake and return the granted parameters.
///
/// # Errors
///
/// - [`TransferError::HandshakeExhausted`] when no HandshakeAck arrives
///   within `1 + max_retries` attempts.
/// - [`TransferError::SequenceViolation`] when the HandshakeAck echoes the
///   wrong bit.  Not retried.
/// - [`TransferError::InvalidGrant`] when the granted values are unusable.
pub async fn negotiate<T: Transport>(
    transport: &T,
    config: &TransferConfig,
) -> Result<SessionParams, TransferError> {
    config.validate()?;

    let request = Frame::Handshake {
        seq: HANDSHAKE_SEQ,
        size: config.datagram_size,
        timeout_ms: config.timeout_ms,
    }
    .encode();
    let deadline = Duration::from_millis(u64::from(config.timeout_ms));
    let attempts = config.max_retries.saturating_add(1);
    // One spare byte so an over-long reply is not mistaken for a grant.
    let mut reply = [0u8; HANDSHAKE_LEN + 1];

    for attempt in 1..=attempts {
        transport.send(&request).await.map_err(handshake_failed)?;
        log::debug!(
            "[handshake] → C{HANDSHAKE_SEQ} size={} timeout={}ms (attempt {attempt}/{attempts})",
            config.datagram_size,
            config.timeout_ms
        );

        let len = match transport
            .recv(&mut reply, deadline)
            .await
            .map_err(handshake_failed)?
        {
            Recv::Datagram(len) => len,
            Recv::TimedOut => continue,
        };

        let Ok(Frame::HandshakeAck {
            seq,
            size,
            timeout_ms,
        }) = Frame::decode(&reply[..len], FrameKind::HandshakeAck)
        else {
            log::trace!("[handshake] ← {len}-byte datagram is not a HandshakeAck; retrying");
            continue;
        };

        if seq != HANDSHAKE_SEQ {
            return Err(TransferError::SequenceViolation {
                expected: HANDSHAKE_SEQ,
                received: seq,
            });
        }

        let params = SessionParams::from_grant(size, timeout_ms, config.max_retries)?;
        log::info!(
            "[handshake] granted datagram size {size} bytes, timeout {timeout_ms} ms (requested {} / {})",
            config.datagram_size,
            config.timeout_ms
        );
        return Ok(params);
    }

    log::warn!("[handshake] no HandshakeAck after {attempts} attempts");
    Err(TransferError::HandshakeExhausted { attempts })
}

/// Server's answer to one Handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// The HandshakeAck to send back.
    pub reply: Frame,
    /// Parameters the server will use for the session.
    pub params: SessionParams,
}

/// Server half: turn a raw Handshake datagram into a [`Grant`].
///
/// Returns `None` when `request` is not a Handshake.  The reply echoes the
/// request's sequence bit so the client can detect a confused responder.
pub fn grant(request: &[u8], policy: &GrantPolicy) -> Option<Grant> {
    let Ok(Frame::Handshake {
        seq,
        size,
        timeout_ms,
    }) = Frame::decode(request, FrameKind::Handshake)
    else {
        return None;
    };
    let (size, timeout_ms) = policy.grant(size, timeout_ms);
    let params = SessionParams::from_grant(size, timeout_ms, policy.max_retries).ok()?;
    Some(Grant {
        reply: Frame::HandshakeAck {
            seq,
            size,
            timeout_ms,
        },
        params,
    })
}

fn handshake_failed(source: io::Error) -> TransferError {
    TransferError::Transport {
        phase: Phase::Handshake,
        progress: Progress::default(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::MemoryTransport;

    #[test]
    fn grant_echoes_sequence_and_applies_policy() {
        let policy = GrantPolicy {
            max_datagram_size: 516,
            timeout_ms: Some(500),
            ..GrantPolicy::default()
        };
        let g = grant(b"C00100000200", &policy).unwrap();
        assert_eq!(
            g.reply,
            Frame::HandshakeAck {
                seq: SeqBit::ZERO,
                size: 516,
                timeout_ms: 500
            }
        );
        assert_eq!(g.params.datagram_size(), 516);
        assert_eq!(g.params.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn grant_ignores_non_handshake() {
        assert!(grant(b"D1abc", &GrantPolicy::default()).is_none());
        assert!(grant(b"A00051600500", &GrantPolicy::default()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_echoed_sequence_is_fatal() {
        let (client, server) = MemoryTransport::pair();
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            server.recv(&mut buf, Duration::from_secs(5)).await.unwrap();
            server.send(b"A10051600500").await.unwrap();
            server
        });

        let result = negotiate(&client, &TransferConfig::new(200, 516)).await;
        assert!(matches!(
            result,
            Err(TransferError::SequenceViolation {
                expected: SeqBit::ZERO,
                received: SeqBit::ONE
            })
        ));
        drop(responder.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_replies_are_retried_until_a_grant_arrives() {
        let (client, server) = MemoryTransport::pair();
        let responder = tokio::spawn(async move {
            // A bare Ack, a grant one byte too long, then the real grant.
            let replies: [&[u8]; 3] = [b"A0", b"A000516005000", b"A00051600500"];
            let mut requests = Vec::new();
            let mut buf = [0u8; 16];
            for reply in replies {
                let Recv::Datagram(n) = server.recv(&mut buf, Duration::from_secs(5)).await.unwrap()
                else {
                    panic!("client stopped sending");
                };
                requests.push(buf[..n].to_vec());
                server.send(reply).await.unwrap();
            }
            requests
        });

        let params = negotiate(&client, &TransferConfig::new(200, 516))
            .await
            .expect("third reply is a grant");
        assert_eq!(params.datagram_size(), 516);
        assert_eq!(params.timeout_ms(), 500);

        let requests = responder.await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r == b"C00051600200"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_exhausts_the_handshake() {
        let (client, server) = MemoryTransport::pair();
        let config = TransferConfig::new(200, 516).with_max_retries(3);
        let result = negotiate(&client, &config).await;
        assert!(matches!(
            result,
            Err(TransferError::HandshakeExhausted { attempts: 4 })
        ));

        // Every attempt was the identical frame.
        let mut buf = [0u8; 16];
        let mut copies = 0;
        while let Recv::Datagram(n) = server.recv(&mut buf, Duration::from_millis(1)).await.unwrap() {
            assert_eq!(&buf[..n], b"C00051600200");
            copies += 1;
        }
        assert_eq!(copies, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected_before_sending() {
        let (client, _server) = MemoryTransport::pair();
        let result = negotiate(&client, &TransferConfig::new(200, 1)).await;
        assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
    }
}
