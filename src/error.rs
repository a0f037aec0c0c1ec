//! Error types used by the dsplink client.
//!
//! This module defines the error enums surfaced by the crate:
//!
//! - [`ClientError`]: failures of a single `get`/`set`/`subscribe` call.
//! - [`ProtocolError`]: wire-level anomalies (malformed frames, unknown ids).
//! - [`ConfigError`]: invalid configuration detected at construction (the only fatal class).
//! - [`ShutdownError`]: graceful shutdown could not drain in time.
//!
//! All types provide `as_label` for logs/metrics; [`ClientError::is_retryable`]
//! tells callers whether repeating the request can succeed.

use std::{io, net::SocketAddr, time::Duration};
use thiserror::Error;

use crate::protocol::RpcError;

/// # Errors returned by client requests.
///
/// Runtime device-facing failures are all recoverable: the supervisor keeps
/// redialing in the background and a later call may succeed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClientError {
    /// The connection dropped while the request was in flight.
    #[error("connection lost before a response arrived")]
    ConnectionLost,

    /// No response arrived within the request timeout.
    #[error("request {id} timed out after {timeout:?}")]
    Timeout {
        /// Correlation id of the request.
        id: u64,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The device did not become reachable within the queue timeout.
    #[error("device not connected after waiting {waited:?}")]
    NotConnected {
        /// How long the caller waited for a connection.
        waited: Duration,
    },

    /// The device answered with a JSON-RPC error object.
    #[error("device rejected request: {0}")]
    Device(RpcError),

    /// The request could not be encoded or the reply could not be understood.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The client is draining or has shut down; no new requests are admitted.
    #[error("client is shutting down")]
    Closed,
}

impl ClientError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use dsplink::ClientError;
    ///
    /// assert_eq!(ClientError::ConnectionLost.as_label(), "connection_lost");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ClientError::ConnectionLost => "connection_lost",
            ClientError::Timeout { .. } => "request_timeout",
            ClientError::NotConnected { .. } => "not_connected",
            ClientError::Device(_) => "device_error",
            ClientError::Protocol(e) => e.as_label(),
            ClientError::Closed => "client_closed",
        }
    }

    /// Indicates whether repeating the same request may succeed.
    ///
    /// Returns `true` for transport-level failures (`ConnectionLost`, `Timeout`,
    /// `NotConnected`), `false` for device rejections, protocol errors and shutdown.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use dsplink::ClientError;
    ///
    /// let err = ClientError::Timeout { id: 7, timeout: Duration::from_secs(3) };
    /// assert!(err.is_retryable());
    /// assert!(!ClientError::Closed.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionLost
                | ClientError::Timeout { .. }
                | ClientError::NotConnected { .. }
        )
    }
}

/// # Wire-level anomalies.
///
/// Reported through `EventKind::ProtocolAnomaly`; they never tear down the connection.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// Frame is not a recognizable JSON-RPC message.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// Frame exceeded the configured maximum length and was discarded.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLong {
        /// Number of bytes discarded.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Response carried no numeric id.
    #[error("response without a usable id")]
    MissingId,

    /// Response id does not match any in-flight request.
    #[error("response for unknown id {id}")]
    UnmatchedId {
        /// The unexpected id.
        id: u64,
    },

    /// Outgoing request could not be serialized.
    #[error("failed to encode request: {reason}")]
    Encode {
        /// Serializer diagnostic.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolError::InvalidUtf8 => "protocol_invalid_utf8",
            ProtocolError::Malformed { .. } => "protocol_malformed",
            ProtocolError::FrameTooLong { .. } => "protocol_frame_too_long",
            ProtocolError::MissingId => "protocol_missing_id",
            ProtocolError::UnmatchedId { .. } => "protocol_unmatched_id",
            ProtocolError::Encode { .. } => "protocol_encode",
        }
    }
}

/// # Configuration errors.
///
/// Detected synchronously while building the client; the only fatal error class.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Device host is empty.
    #[error("device host is empty")]
    EmptyHost,

    /// A port is outside the usable range.
    #[error("invalid {field} port {port}")]
    InvalidPort {
        /// Which setting carried the port.
        field: &'static str,
        /// The rejected value.
        port: u16,
    },

    /// The device address could not be resolved.
    #[error("cannot resolve {addr}: {source}")]
    Unresolvable {
        /// `host:port` that failed to resolve.
        addr: String,
        /// Resolver error.
        source: io::Error,
    },

    /// A duration that must be positive is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending setting.
        field: &'static str,
    },

    /// Keep-alive is enabled but no probe parameter is configured.
    #[error("keep-alive is enabled but keepalive_param is empty")]
    EmptyKeepAliveParam,

    /// The telemetry UDP socket could not be bound.
    #[error("cannot bind telemetry socket {addr}: {source}")]
    TelemetryBind {
        /// Requested bind address.
        addr: SocketAddr,
        /// Socket error.
        source: io::Error,
    },

    /// The client was built outside a tokio runtime.
    #[error("client must be built inside a tokio runtime")]
    NoRuntime,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::EmptyHost => "config_empty_host",
            ConfigError::InvalidPort { .. } => "config_invalid_port",
            ConfigError::Unresolvable { .. } => "config_unresolvable",
            ConfigError::ZeroDuration { .. } => "config_zero_duration",
            ConfigError::EmptyKeepAliveParam => "config_empty_keepalive_param",
            ConfigError::TelemetryBind { .. } => "config_telemetry_bind",
            ConfigError::NoRuntime => "config_no_runtime",
        }
    }
}

/// # Errors produced by graceful shutdown.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ShutdownError {
    /// In-flight requests did not resolve within the grace period.
    #[error("shutdown grace {grace:?} exceeded; stuck requests: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Correlation ids still in flight when grace ran out.
        stuck: Vec<u64>,
    },
}

impl ShutdownError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use dsplink::ShutdownError;
    ///
    /// let err = ShutdownError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "shutdown_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownError::GraceExceeded { .. } => "shutdown_grace_exceeded",
        }
    }
}
