use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `netvigil-proto` crate.
///
/// Covers every failure mode across the protocol surfaces: TCP sessions
/// to the RouterOS API, SNMP datagrams, and the ICMP ping helper.
/// `netvigil-core` maps these into domain errors and probe failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// Could not reach the endpoint (refused, unreachable, DNS, etc.)
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The peer closed or reset an established session.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Socket-level failure not attributable to a specific phase.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected or SNMPv3 security parameters refused.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// Malformed, truncated, or unexpected response.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A RouterOS command was rejected with `!trap`. The session is still usable.
    #[error("command {command} failed: {message}")]
    Trap { command: String, message: String },

    /// Non-zero SNMP `error-status` in a response PDU.
    #[error("SNMP error status {status} at index {index}")]
    SnmpStatus { status: i64, index: i64 },

    // ── Deadlines ───────────────────────────────────────────────────
    /// The operation did not complete within its deadline.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    // ── Input ───────────────────────────────────────────────────────
    /// Address failed validation before any I/O was attempted.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// Credential material is missing or unusable for the requested protocol.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Coarse failure classes. The probing engine only cares about these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Auth,
    Protocol,
    Timeout,
    Validation,
    Cancelled,
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Classify this error into one of the coarse [`ErrorKind`]s.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } | Self::ConnectionLost(_) | Self::Io(_) => ErrorKind::Connect,
            Self::Authentication { .. } => ErrorKind::Auth,
            Self::Protocol { .. } | Self::Trap { .. } | Self::SnmpStatus { .. } => {
                ErrorKind::Protocol
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidAddress(_) | Self::InvalidCredentials(_) => ErrorKind::Validation,
        }
    }

    /// Returns `true` if the underlying session can no longer be used.
    ///
    /// Command-level failures (`!trap`, SNMP error status) leave the
    /// session intact; resets, refusals, timeouts and closed sockets do not.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::ConnectionLost(_) | Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_is_not_connection_loss() {
        let err = Error::Trap {
            command: "/interface/print".into(),
            message: "no such command".into(),
        };
        assert!(!err.is_connection_loss());
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn reset_is_connection_loss() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.is_connection_loss());
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[test]
    fn timeout_classifies() {
        let err = Error::Timeout(Duration::from_secs(2));
        assert!(err.is_timeout());
        assert!(err.is_connection_loss());
        assert_eq!(err.to_string(), "timed out after 2000ms");
    }
}
