//! # UDP meter listener.
//!
//! The listener owns its own socket and task, independent of the TCP session:
//! command-channel faults never stop meters, and a bad datagram never touches
//! command traffic.
//!
//! ```text
//! UdpSocket ──recv_from──► decode_datagram ──► Fanout ──► TelemetrySubscription queues
//!     │                          └─ error ──► TelemetryDecodeFailed
//!     └─ socket error ──► TelemetryFailed ──► backoff ──► rebind (same local address)
//! ```
//!
//! The socket is bound with `SO_REUSEADDR` (plus `SO_REUSEPORT` on unix) so
//! several worker processes on one host can all receive the broadcast.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::core::fanout::Fanout;
use crate::core::TelemetryConfig;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffPolicy;
use crate::telemetry::packet::{TelemetrySample, decode_datagram};

/// Receiving end of the meter stream.
pub struct TelemetrySubscription {
    rx: mpsc::Receiver<TelemetrySample>,
}

impl TelemetrySubscription {
    /// Waits for the next sample; `None` once the client has shut down.
    pub async fn recv(&mut self) -> Option<TelemetrySample> {
        self.rx.recv().await
    }

    /// Returns a queued sample without waiting.
    pub fn try_recv(&mut self) -> Option<TelemetrySample> {
        self.rx.try_recv().ok()
    }

    /// Unwraps the underlying queue.
    pub fn into_receiver(self) -> mpsc::Receiver<TelemetrySample> {
        self.rx
    }
}

/// Binds a non-blocking UDP socket with address (and port) reuse.
pub(crate) fn bind(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Shared state of the meter listener.
pub(crate) struct TelemetryHub {
    subscribers: Mutex<Fanout<TelemetrySample>>,
    next_id: AtomicU64,
    queue: usize,
    max_datagram: usize,
    backoff: BackoffPolicy,
    local_addr: SocketAddr,
}

impl TelemetryHub {
    pub(crate) fn new(cfg: &TelemetryConfig, local_addr: SocketAddr) -> Self {
        Self {
            subscribers: Mutex::new(Fanout::new()),
            next_id: AtomicU64::new(1),
            queue: cfg.queue.max(1),
            max_datagram: cfg.max_datagram.max(1),
            backoff: cfg.backoff,
            local_addr,
        }
    }

    /// Address the socket is bound to (resolved when binding port 0).
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn subscribe(&self) -> TelemetrySubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        TelemetrySubscription {
            rx: self.lock().attach(id, self.queue),
        }
    }

    /// Closes every subscriber queue.
    pub(crate) fn close(&self) {
        *self.lock() = Fanout::new();
    }

    /// Receives datagrams until `token` is cancelled, rebinding after socket errors.
    pub(crate) async fn run(self: Arc<Self>, socket: UdpSocket, bus: Bus, token: CancellationToken) {
        let mut socket = Some(socket);
        let mut failures: u32 = 0;
        let mut buf = vec![0u8; self.max_datagram];

        loop {
            let sock = match socket.take() {
                Some(sock) => sock,
                None => match bind(self.local_addr).and_then(UdpSocket::from_std) {
                    Ok(sock) => sock,
                    Err(e) => {
                        if !self.pause(&bus, &token, &mut failures, e.to_string()).await {
                            return;
                        }
                        continue;
                    }
                },
            };
            bus.publish(Event::new(EventKind::TelemetryBound).with_peer(self.local_addr));

            let err = loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    res = sock.recv_from(&mut buf) => match res {
                        Ok((n, from)) => {
                            failures = 0;
                            self.ingest(&buf[..n], from, &bus);
                        }
                        Err(e) => break e,
                    },
                }
            };
            drop(sock);

            if !self.pause(&bus, &token, &mut failures, err.to_string()).await {
                return;
            }
        }
    }

    fn ingest(&self, datagram: &[u8], from: SocketAddr, bus: &Bus) {
        match decode_datagram(datagram, SystemTime::now()) {
            Ok(samples) => {
                let mut subscribers = self.lock();
                let dropped: usize = samples.iter().map(|s| subscribers.emit(s)).sum();
                if dropped > 0 {
                    bus.publish(
                        Event::new(EventKind::ListenerOverflow)
                            .with_param("telemetry")
                            .with_count(dropped),
                    );
                }
            }
            Err(e) => bus.publish(
                Event::new(EventKind::TelemetryDecodeFailed)
                    .with_peer(from)
                    .with_reason(e.to_string()),
            ),
        }
    }

    /// Sleeps one backoff step. Returns `false` when the listener should stop.
    async fn pause(
        &self,
        bus: &Bus,
        token: &CancellationToken,
        failures: &mut u32,
        reason: String,
    ) -> bool {
        if !self.backoff.allows(*failures) {
            return false;
        }
        let delay = self.backoff.next(*failures);
        *failures = failures.saturating_add(1);
        bus.publish(
            Event::new(EventKind::TelemetryFailed)
                .with_reason(reason)
                .with_delay(delay),
        );
        tokio::select! {
            _ = time::sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Fanout<TelemetrySample>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
