//! Error taxonomy and translation.
//!
//! # Design
//! Transports report raw `TransportError`s, including `Cancelled` when a
//! deadline fires and `Aggregate` when several faults were collected for one
//! exchange. Error interceptors see the fault as raised. Only on the
//! re-raise path does `translate` fold cancellations (direct or nested) into
//! `RpcError::Timeout`; everything else passes through unchanged.
//!
//! `RpcError::Protocol` renders as `ReasonPhrase:{reason},StatusCode:{status}`.
//! Callers match on that string, so the format must not change.

use std::time::Duration;

use crate::codec::CodecError;
use crate::http::HttpResponse;

/// A fault raised by a transport while exchanging one request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The exchange was cancelled because its deadline elapsed.
    #[error("request was cancelled")]
    Cancelled,

    /// Several faults raised together for one exchange.
    #[error("{} transport faults, first: {}", .0.len(), first_message(.0))]
    Aggregate(Vec<TransportError>),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn first_message(faults: &[TransportError]) -> String {
    faults
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

impl TransportError {
    /// True for a cancellation, or an aggregate holding one at any depth.
    pub fn is_cancellation(&self) -> bool {
        match self {
            TransportError::Cancelled => true,
            TransportError::Aggregate(inner) => inner.iter().any(TransportError::is_cancellation),
            _ => false,
        }
    }
}

/// Errors returned by client invocations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Dispatch exceeded its deadline.
    #[error("invocation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A response arrived with a non-success status.
    #[error("ReasonPhrase:{reason},StatusCode:{status}")]
    Protocol { reason: String, status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl RpcError {
    /// Build the protocol error for a non-success response.
    pub fn from_status(response: &HttpResponse) -> Self {
        RpcError::Protocol {
            reason: response.reason.clone(),
            status: response.status,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout(_))
    }

    /// Status code of a protocol error.
    pub fn status(&self) -> Option<u16> {
        match self {
            RpcError::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Classify a raised fault before it reaches the caller.
///
/// Cancellations become `Timeout(timeout)`; every other fault is returned
/// unchanged.
pub fn translate(err: RpcError, timeout: Duration) -> RpcError {
    match err {
        RpcError::Transport(ref fault) if fault.is_cancellation() => RpcError::Timeout(timeout),
        other => other,
    }
}
