//! Error taxonomy for the engine.
//!
//! Two families exist and they never mix: `ConfigError` is raised once,
//! before any load is generated, and aborts the run. `ErrorKind` classifies a
//! failed request attempt and is recorded as a normal outcome inside the
//! runner loop; it never propagates out of it.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

/// Invalid scenario configuration. Reported before any runner starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ramp schedule is empty")]
    EmptyRamp,

    #[error("ramp schedule durations sum to zero")]
    ZeroRampDuration,

    #[error("invalid duration '{0}' (expected e.g. \"30s\", \"500ms\", \"1m\")")]
    InvalidDuration(String),

    #[error("unknown metric '{0}' in threshold expression")]
    UnknownMetric(String),

    #[error("invalid threshold expression '{0}' (expected e.g. \"p95_latency_ms < 500\")")]
    InvalidThreshold(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid check '{name}': {reason}")]
    InvalidCheck { name: String, reason: String },

    #[error("environment variable '{0}' referenced by the config is not set")]
    MissingEnvVar(String),
}

/// Classification of a failed request attempt.
///
/// Recorded on the outcome in place of a status code. A response with an HTTP
/// error status (4xx/5xx) is not an `ErrorKind`; it carries its status code
/// and counts against the error rate separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request did not complete within its bounded timeout.
    Timeout,
    /// TCP connect was refused by the target.
    ConnectionRefused,
    /// Host name resolution failed.
    DnsFailure,
    /// Any other transport or protocol-level failure.
    Protocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a transport error from the HTTP client into an [`ErrorKind`].
///
/// Walks the source chain looking for an `std::io::Error`; resolver failures
/// do not always surface a typed io error, so a message check backs it up.
pub fn classify_transport_error(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return ErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                _ => {
                    let msg = io.to_string();
                    if msg.contains("lookup") || msg.contains("resolve") {
                        return ErrorKind::DnsFailure;
                    }
                }
            }
        }
        source = e.source();
    }

    let msg = err.to_string();
    if msg.contains("dns") || msg.contains("lookup") || msg.contains("resolve") {
        ErrorKind::DnsFailure
    } else {
        ErrorKind::Protocol
    }
}
