use std::time::Duration;

use thiserror::Error;

use crate::database::models::{MonitorTarget, TargetKind};

/// Why a single probe attempt failed. The `Display` text is what gets stored
/// as the check result's error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("timeout")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("{0}")]
    Unknown(String),
}

/// Everything a probe needs to reach one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub kind: TargetKind,
    pub address: String,
    pub port: Option<u16>,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn http(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: TargetKind::Http,
            address: address.into(),
            port: None,
            timeout,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            kind: TargetKind::Tcp,
            address: host.into(),
            port: Some(port),
            timeout,
        }
    }

    /// Build a request for a stored target using the per-kind timeouts.
    pub fn for_target(target: &MonitorTarget, http_timeout: Duration, tcp_timeout: Duration) -> Self {
        let timeout = match target.kind {
            TargetKind::Http => http_timeout,
            TargetKind::Tcp => tcp_timeout,
        };
        Self {
            kind: target.kind,
            address: target.address.clone(),
            port: target.port,
            timeout,
        }
    }
}

/// Outcome of one probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ok: bool,
    /// Wall-clock time of the attempt; absent when the attempt timed out
    pub latency_ms: Option<u64>,
    pub failure: Option<ProbeFailure>,
}

impl ProbeOutcome {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms: Some(latency_ms),
            failure: None,
        }
    }

    pub fn failure(failure: ProbeFailure, latency_ms: u64) -> Self {
        let latency_ms = match failure {
            ProbeFailure::Timeout => None,
            _ => Some(latency_ms),
        };
        Self {
            ok: false,
            latency_ms,
            failure: Some(failure),
        }
    }

    pub fn timeout() -> Self {
        Self::failure(ProbeFailure::Timeout, 0)
    }

    /// Diagnostic string for failed attempts.
    pub fn error(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }
}
