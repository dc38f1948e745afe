// ── Core error types ──
//
// Errors surfaced by netvigil-core. Adapters never return these outward;
// they collapse transport failures into a `ProbeFailure`. `CoreError` is
// what the engine, the pool and the store hand to their callers. The
// `From<netvigil_proto::Error>` impl translates wire-level failures into
// domain variants.

use thiserror::Error;

use netvigil_proto::ErrorKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Connection not found: {identifier}")]
    ConnectionNotFound { identifier: String },

    #[error("Credential profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("No {protocol} credentials configured for {device}")]
    MissingCredentials { device: String, protocol: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Probing engine is already running")]
    AlreadyRunning,

    #[error("Connection to {address} is cooling down after repeated failures")]
    CoolingDown { address: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the referenced record no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. } | Self::ConnectionNotFound { .. } | Self::ProfileNotFound { .. }
        )
    }

    /// Coarse failure class, shared with the transport layer.
    ///
    /// `None` for variants that are not probe failures (not-found, engine
    /// lifecycle, internal bugs).
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::ConnectionFailed { .. } | Self::CoolingDown { .. } => Some(ErrorKind::Connect),
            Self::AuthenticationFailed { .. } => Some(ErrorKind::Auth),
            Self::Timeout { .. } => Some(ErrorKind::Timeout),
            Self::Cancelled => Some(ErrorKind::Cancelled),
            Self::Protocol { .. } => Some(ErrorKind::Protocol),
            Self::ValidationFailed { .. } | Self::MissingCredentials { .. } => {
                Some(ErrorKind::Validation)
            }
            Self::DeviceNotFound { .. }
            | Self::ConnectionNotFound { .. }
            | Self::ProfileNotFound { .. }
            | Self::AlreadyRunning
            | Self::Internal(_) => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<netvigil_proto::Error> for CoreError {
    fn from(err: netvigil_proto::Error) -> Self {
        use netvigil_proto::Error as E;
        match err {
            E::Connect { address, reason } => CoreError::ConnectionFailed { address, reason },
            E::ConnectionLost(reason) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("connection lost: {reason}"),
            },
            E::Io(e) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: e.to_string(),
            },
            E::Authentication { message } => CoreError::AuthenticationFailed { message },
            E::Protocol { message } => CoreError::Protocol { message },
            E::Trap { command, message } => CoreError::Protocol {
                message: format!("{command}: {message}"),
            },
            e @ E::SnmpStatus { .. } => CoreError::Protocol {
                message: e.to_string(),
            },
            E::Timeout(d) => CoreError::Timeout {
                timeout_ms: u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
            },
            E::Cancelled => CoreError::Cancelled,
            E::InvalidAddress(addr) => CoreError::ValidationFailed {
                message: format!("invalid address {addr:?}"),
            },
            E::InvalidCredentials(message) => CoreError::ValidationFailed { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn transport_timeout_keeps_duration() {
        let err = CoreError::from(netvigil_proto::Error::Timeout(Duration::from_secs(3)));
        assert!(matches!(err, CoreError::Timeout { timeout_ms: 3000 }));
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn trap_becomes_protocol_error() {
        let err = CoreError::from(netvigil_proto::Error::Trap {
            command: "/interface/print".into(),
            message: "no such command".into(),
        });
        assert_eq!(err.to_string(), "Protocol error: /interface/print: no such command");
    }

    #[test]
    fn not_found_has_no_probe_kind() {
        let err = CoreError::DeviceNotFound {
            identifier: "gone".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.kind(), None);
    }
}
