//! # Runtime events emitted by the client.
//!
//! The [`EventKind`] enum classifies events across five areas:
//! - **Connection**: dial/redial lifecycle and keep-alive
//! - **Requests**: timeouts and wire anomalies
//! - **Subscriptions**: replay after reconnect, listener overflow
//! - **Telemetry**: UDP listener lifecycle and decode errors
//! - **Runtime**: subscriber isolation and graceful shutdown
//!
//! The [`Event`] struct carries optional metadata: parameter, correlation id,
//! attempt, delays and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use dsplink::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RequestTimedOut)
//!     .with_param("ZoneGain_0")
//!     .with_id(42)
//!     .with_timeout(Duration::from_secs(3));
//!
//! assert_eq!(ev.kind, EventKind::RequestTimedOut);
//! assert_eq!(ev.param.as_deref(), Some("ZoneGain_0"));
//! assert_eq!(ev.timeout_ms, Some(3000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Connection ===
    /// Dial attempt started. Sets `peer`, `attempt`.
    Connecting,
    /// TCP session established. Sets `peer`.
    Connected,
    /// Established session ended. Sets `peer`, `reason`, `count` (requests failed).
    Disconnected,
    /// Dial attempt failed. Sets `peer`, `attempt`, `reason`.
    ConnectFailed,
    /// Next dial scheduled. Sets `attempt`, `delay_ms`.
    BackoffScheduled,
    /// `max_attempts` reached; the supervisor stopped redialing. Sets `attempt`.
    ReconnectExhausted,
    /// Keep-alive probe went unanswered; a reconnect is forced. Sets `timeout_ms`.
    KeepAliveMissed,

    // === Requests ===
    /// A request resolved with a timeout. Sets `id`, `param`, `timeout_ms`.
    RequestTimedOut,
    /// Malformed frame or unmatched id; the frame was dropped. Sets `reason`, optional `id`.
    ProtocolAnomaly,

    // === Subscriptions ===
    /// A parameter was re-armed on a new connection. Sets `param`.
    Resubscribed,
    /// A parameter could not be re-armed; it stays stale until the next reconnect.
    /// Sets `param`, `reason`.
    ReplayFailed,
    /// Device-level `unsub` failed (local state already removed). Sets `param`, `reason`.
    UnsubscribeFailed,
    /// A listener queue was full; the update was dropped for that listener only.
    /// Sets `param`, `count` (listeners affected).
    ListenerOverflow,

    // === Telemetry ===
    /// UDP socket bound. Sets `peer` (local address).
    TelemetryBound,
    /// UDP socket failed; a rebind is scheduled. Sets `reason`, `delay_ms`.
    TelemetryFailed,
    /// A datagram could not be decoded and was dropped. Sets `peer`, `reason`.
    TelemetryDecodeFailed,

    // === Runtime ===
    /// Event subscriber panicked. Sets `param` (subscriber name), `reason`.
    SubscriberPanicked,
    /// Event subscriber queue overflowed. Sets `param` (subscriber name), `reason`.
    SubscriberOverflow,
    /// `shutdown()` called; no new requests are admitted.
    ShutdownRequested,
    /// All in-flight requests resolved within the grace period.
    DrainedWithinGrace,
    /// Grace period exceeded. Sets `count` (stuck requests).
    GraceExceeded,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Parameter key (or subscriber name for subscriber events).
    pub param: Option<Arc<str>>,
    /// Correlation id of the request concerned.
    pub id: Option<u64>,
    /// Dial attempt (1-based).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Generic counter (failed requests, affected listeners, stuck requests).
    pub count: Option<usize>,
    /// Remote or local socket address.
    pub peer: Option<Arc<str>>,
    /// Human-readable reason (errors, diagnostics).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            param: None,
            id: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            count: None,
            peer: None,
            reason: None,
        }
    }

    /// Attaches a parameter key.
    #[inline]
    pub fn with_param(mut self, param: impl Into<Arc<str>>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// Attaches a correlation id.
    #[inline]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(clamp_ms(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(clamp_ms(d));
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }

    /// Attaches a socket address.
    #[inline]
    pub fn with_peer(mut self, peer: impl ToString) -> Self {
        self.peer = Some(Arc::from(peer.to_string()));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_param(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_param(subscriber)
            .with_reason(info)
    }
}

#[inline]
fn clamp_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
