//! # LogWriter: renders events as `tracing` records
//!
//! A subscriber that forwards incoming [`Event`]s to the `tracing` facade with
//! structured fields. Install any `tracing` subscriber (fmt, json, journald) in
//! the host application to collect them.
//!
//! ## Levels
//! - `warn`: failures that degrade service (disconnects, timeouts, stale subscriptions)
//! - `info`: connection lifecycle and shutdown
//! - `debug`: routine noise (backoff scheduling, resubscribe confirmations)

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let seq = e.seq;
        let param = e.param.as_deref().unwrap_or("-");
        let peer = e.peer.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::Connecting => {
                debug!(seq, peer, attempt = e.attempt, "connecting");
            }
            EventKind::Connected => {
                info!(seq, peer, "connected");
            }
            EventKind::Disconnected => {
                warn!(seq, peer, reason, failed_requests = e.count, "disconnected");
            }
            EventKind::ConnectFailed => {
                warn!(seq, peer, attempt = e.attempt, reason, "connect failed");
            }
            EventKind::BackoffScheduled => {
                debug!(seq, attempt = e.attempt, delay_ms = e.delay_ms, "redial scheduled");
            }
            EventKind::ReconnectExhausted => {
                warn!(seq, attempt = e.attempt, "redial attempts exhausted");
            }
            EventKind::KeepAliveMissed => {
                warn!(seq, timeout_ms = e.timeout_ms, "keep-alive unanswered, forcing reconnect");
            }
            EventKind::RequestTimedOut => {
                warn!(seq, param, id = e.id, timeout_ms = e.timeout_ms, "request timed out");
            }
            EventKind::ProtocolAnomaly => {
                warn!(seq, id = e.id, reason, "protocol anomaly, frame dropped");
            }
            EventKind::Resubscribed => {
                debug!(seq, param, "subscription re-armed");
            }
            EventKind::ReplayFailed => {
                warn!(seq, param, reason, "subscription stale, retry on next reconnect");
            }
            EventKind::UnsubscribeFailed => {
                warn!(seq, param, reason, "device unsubscribe failed");
            }
            EventKind::ListenerOverflow => {
                warn!(seq, param, listeners = e.count, "listener queue full, update dropped");
            }
            EventKind::TelemetryBound => {
                info!(seq, local = peer, "telemetry listener bound");
            }
            EventKind::TelemetryFailed => {
                warn!(seq, reason, delay_ms = e.delay_ms, "telemetry socket failed");
            }
            EventKind::TelemetryDecodeFailed => {
                debug!(seq, from = peer, reason, "telemetry datagram dropped");
            }
            EventKind::SubscriberPanicked => {
                warn!(seq, subscriber = param, info = reason, "subscriber panicked");
            }
            EventKind::SubscriberOverflow => {
                warn!(seq, subscriber = param, reason, "subscriber overflow");
            }
            EventKind::ShutdownRequested => {
                info!(seq, "shutdown requested");
            }
            EventKind::DrainedWithinGrace => {
                info!(seq, "drained within grace");
            }
            EventKind::GraceExceeded => {
                warn!(seq, stuck = e.count, "shutdown grace exceeded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_writes_structured_records() {
        let writer = LogWriter::new();
        writer
            .on_event(
                &Event::new(EventKind::RequestTimedOut)
                    .with_param("ZoneGain_3")
                    .with_id(17),
            )
            .await;
        writer
            .on_event(&Event::new(EventKind::Connected).with_peer("10.0.0.5:5321"))
            .await;

        assert!(logs_contain("request timed out"));
        assert!(logs_contain("ZoneGain_3"));
        assert!(logs_contain("10.0.0.5:5321"));
    }
}
