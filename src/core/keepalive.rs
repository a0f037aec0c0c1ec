//! # Keep-alive probe.
//!
//! While a session is up, reads a benign parameter every interval. An
//! unanswered probe means the device (or a middlebox) silently dropped the
//! session: the probe cancels the session's `force` token and the supervisor
//! tears it down and redials.
//!
//! A device error reply still proves the link is alive. A lost connection ends
//! the probe quietly; the supervisor is already handling it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::client::Shared;
use crate::core::state::WriterHandle;
use crate::error::ClientError;
use crate::events::{Event, EventKind};
use crate::protocol::Method;

/// Probes every `every` until a probe times out or the session ends.
pub(crate) async fn run(
    shared: Arc<Shared>,
    writer: WriterHandle,
    every: Duration,
    force: CancellationToken,
) {
    let param: Arc<str> = Arc::from(shared.cfg.keepalive_param.as_str());
    let mut ticker = time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let probe = shared.request(Method::Get, Arc::clone(&param));
        match shared.send_on(&writer, probe).await {
            Ok(_) | Err(ClientError::Device(_)) => {}
            Err(ClientError::Timeout { .. }) => {
                shared.bus.publish(
                    Event::new(EventKind::KeepAliveMissed)
                        .with_param(Arc::clone(&param))
                        .with_timeout(shared.cfg.request_timeout),
                );
                force.cancel();
                return;
            }
            Err(_) => return,
        }
    }
}
