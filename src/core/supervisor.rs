//! # Supervisor: owns the device link and redials it.
//!
//! The supervisor is the single task that moves the [`ConnectionState`]. It
//! dials, serves one session at a time, tears the session down on any fault and
//! redials with [`BackoffPolicy`](crate::BackoffPolicy) delays.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► Connecting ── publish Connecting{ attempt }
//!   ├─► dial(addr) within connect_timeout          (cancellable by drain)
//!   │     ├─ Ok  ──► serve(session) ──► teardown ──► Disconnected
//!   │     │          ├─ lasted >= stable_after ──► failures = 0
//!   │     │          └─ shorter                ──► failures += 1
//!   │     └─ Err ──► Disconnected, publish ConnectFailed, failures += 1
//!   ├─► max_attempts reached ──► ReconnectExhausted, exit
//!   ├─► delay = backoff.next(failures)
//!   ├─► publish BackoffScheduled{ delay }
//!   └─► sleep(delay)                               (cancellable by drain)
//! }
//! ```
//!
//! ## Session
//! ```text
//! serve(stream)
//!   ├─► epoch = begin_epoch(), spawn write_loop + read_loop
//!   ├─► install writer, Connected, publish Connected
//!   ├─► spawn replay (claim(param, epoch) → sub, per param under the arm gate) and keep-alive
//!   └─► wait for: I/O task exit | keep-alive miss | drain (→ Draining, keep serving) | runtime cancel
//!
//! teardown
//!   ├─► clear writer, Disconnected (rejected when Draining)
//!   ├─► stop replay/keep-alive, then reader/writer
//!   ├─► registry.reset_all()                 every subscription back to Unarmed
//!   └─► router.fail_all(ConnectionLost)      (Closed when shutting down)
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::client::Shared;
use crate::core::connection::{read_loop, write_loop};
use crate::core::keepalive;
use crate::core::state::{ConnectionState, WriterHandle};
use crate::error::ClientError;
use crate::events::{Event, EventKind};

/// Drives the connection state machine for one client.
pub(crate) struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Runs until shutdown or until the redial budget is exhausted.
    pub(crate) async fn run(self) {
        let shared = &self.shared;
        let mut failures: u32 = 0;

        loop {
            if shared.drain.is_cancelled() || !shared.link.transition(ConnectionState::Connecting) {
                break;
            }
            shared.bus.publish(
                Event::new(EventKind::Connecting)
                    .with_peer(shared.addr)
                    .with_attempt(failures + 1),
            );

            let dial = time::timeout(shared.cfg.connect_timeout, TcpStream::connect(shared.addr));
            let dialed = tokio::select! {
                res = dial => res,
                _ = shared.drain.cancelled() => break,
            };

            match dialed {
                Ok(Ok(stream)) => {
                    let started = Instant::now();
                    self.serve(stream).await;
                    if shared.drain.is_cancelled() {
                        break;
                    }
                    if started.elapsed() >= shared.cfg.stable_after {
                        failures = 0;
                    } else {
                        failures = failures.saturating_add(1);
                    }
                }
                Ok(Err(e)) => self.dial_failed(&mut failures, e.to_string()),
                Err(_elapsed) => self.dial_failed(
                    &mut failures,
                    format!("no answer within {:?}", shared.cfg.connect_timeout),
                ),
            }

            if !shared.cfg.backoff.allows(failures) {
                shared
                    .bus
                    .publish(Event::new(EventKind::ReconnectExhausted).with_attempt(failures));
                break;
            }

            let delay = shared.cfg.backoff.next(failures);
            shared.bus.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_attempt(failures + 1)
                    .with_delay(delay),
            );
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shared.drain.cancelled() => break,
            }
        }

        if shared.drain.is_cancelled() {
            shared.link.transition(ConnectionState::Draining);
        }
    }

    fn dial_failed(&self, failures: &mut u32, reason: String) {
        self.shared.link.transition(ConnectionState::Disconnected);
        *failures = failures.saturating_add(1);
        self.shared.bus.publish(
            Event::new(EventKind::ConnectFailed)
                .with_peer(self.shared.addr)
                .with_attempt(*failures)
                .with_reason(reason),
        );
    }

    /// Serves one session until it fails or the client shuts down.
    async fn serve(&self, stream: TcpStream) {
        let shared = &self.shared;
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().unwrap_or(shared.addr);
        let epoch = shared.link.begin_epoch();
        let (rd, wr) = stream.into_split();
        let (tx, rx) = mpsc::channel::<Bytes>(shared.cfg.write_queue.max(1));

        let mut io: JoinSet<String> = JoinSet::new();
        io.spawn(write_loop(wr, rx));
        {
            let shared = Arc::clone(shared);
            io.spawn(async move { read_loop(rd, &shared).await });
        }

        let writer = WriterHandle { epoch, tx };
        shared.link.install(writer.clone());
        shared.link.transition(ConnectionState::Connected);
        shared
            .bus
            .publish(Event::new(EventKind::Connected).with_peer(peer));

        let force = CancellationToken::new();
        let mut aux: JoinSet<()> = JoinSet::new();
        aux.spawn(replay(Arc::clone(shared), writer.clone()));
        if let Some(every) = shared.cfg.keepalive() {
            aux.spawn(keepalive::run(
                Arc::clone(shared),
                writer,
                every,
                force.clone(),
            ));
        }

        let mut draining = false;
        let reason = loop {
            tokio::select! {
                res = io.join_next() => {
                    break match res {
                        Some(Ok(reason)) => reason,
                        Some(Err(e)) => format!("session task failed: {e}"),
                        None => "session tasks ended".to_string(),
                    };
                }
                _ = force.cancelled() => break "keep-alive unanswered".to_string(),
                _ = shared.drain.cancelled(), if !draining => {
                    draining = true;
                    shared.link.transition(ConnectionState::Draining);
                }
                _ = shared.runtime.cancelled() => break "client shut down".to_string(),
            }
        };

        shared.link.clear_writer();
        shared.link.transition(ConnectionState::Disconnected);
        aux.shutdown().await;
        io.shutdown().await;
        shared.registry.reset_all();

        let failed = if shared.drain.is_cancelled() {
            shared.router.fail_all(|| ClientError::Closed)
        } else {
            shared.router.fail_all(|| ClientError::ConnectionLost)
        };
        shared.bus.publish(
            Event::new(EventKind::Disconnected)
                .with_peer(peer)
                .with_reason(reason)
                .with_count(failed),
        );
    }
}

/// Re-arms every subscription not yet armed on this session.
///
/// Partial failure is tolerated: a parameter that fails stays unarmed, is
/// reported as `ReplayFailed` and is retried on the next session. Each
/// parameter is claimed under the arm gate, so a concurrent `subscribe` or
/// `unsubscribe` of it is ordered before or after its `sub`.
async fn replay(shared: Arc<Shared>, writer: WriterHandle) {
    for param in shared.registry.params() {
        let _gate = shared.arm_gate.lock().await;
        if !shared.registry.claim(&param, writer.epoch) {
            continue;
        }
        match shared.arm(&writer, &param).await {
            Ok(()) => shared
                .bus
                .publish(Event::new(EventKind::Resubscribed).with_param(param)),
            Err(ClientError::ConnectionLost) => return,
            Err(e) => shared.bus.publish(
                Event::new(EventKind::ReplayFailed)
                    .with_param(param)
                    .with_reason(e.to_string()),
            ),
        }
    }
}
