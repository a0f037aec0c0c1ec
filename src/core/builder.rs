use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::client::{Client, Shared, Tasks};
use crate::core::registry::Registry;
use crate::core::router::Router;
use crate::core::state::Link;
use crate::core::supervisor::Supervisor;
use crate::core::ClientConfig;
use crate::error::ConfigError;
use crate::events::{Bus, Event};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::telemetry::{self, TelemetryHub};

/// Builder for constructing a [`Client`].
pub struct ClientBuilder {
    cfg: ClientConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ClientBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ClientConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (connection lifecycle, timeouts,
    /// anomalies) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one event subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Validates the configuration, binds telemetry and starts the client.
    ///
    /// The first dial happens in the background; the returned client is usable
    /// immediately (calls wait up to `queue_timeout` for the link).
    ///
    /// # Errors
    /// Any [`ConfigError`]: invalid fields, unresolvable host, telemetry bind
    /// failure, or no tokio runtime.
    pub fn build(self) -> Result<Client, ConfigError> {
        Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let addr = self.cfg.validate()?;

        let telemetry = match &self.cfg.telemetry {
            Some(tcfg) => {
                let bind_err = |source| ConfigError::TelemetryBind {
                    addr: tcfg.bind,
                    source,
                };
                let socket = telemetry::bind(tcfg.bind)
                    .and_then(UdpSocket::from_std)
                    .map_err(bind_err)?;
                let local = socket.local_addr().map_err(bind_err)?;
                Some((Arc::new(TelemetryHub::new(tcfg, local)), socket))
            }
            None => None,
        };

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let events_rx = bus.subscribe();
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let events_stop = CancellationToken::new();
        let events = subscriber_listener(events_rx, subs, events_stop.clone());

        let runtime = CancellationToken::new();
        let permits = self
            .cfg
            .in_flight_limit()
            .map(Semaphore::new)
            .map(Arc::new);

        let shared = Arc::new(Shared {
            addr,
            bus: bus.clone(),
            link: Link::new(),
            router: Router::new(),
            registry: Registry::new(self.cfg.listener_queue),
            telemetry: telemetry.as_ref().map(|(hub, _)| Arc::clone(hub)),
            permits,
            arm_gate: tokio::sync::Mutex::new(()),
            drain: CancellationToken::new(),
            runtime: runtime.clone(),
            tasks: Mutex::new(None),
            cfg: self.cfg,
        });

        let supervisor = tokio::spawn(Supervisor::new(Arc::clone(&shared)).run());
        let telemetry =
            telemetry.map(|(hub, socket)| tokio::spawn(hub.run(socket, bus, runtime.clone())));

        *shared
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Tasks {
            supervisor,
            telemetry,
            events,
            events_stop,
        });
        Ok(Client { shared })
    }
}

/// Forwards bus events to the subscriber set until `stop`, then flushes it.
///
/// Pending events are drained before `stop` is honored.
fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: SubscriberSet,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(ev),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = stop.cancelled() => break,
            }
        }
        set.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TelemetryConfig;

    #[test]
    fn test_build_outside_runtime_fails() {
        let err = ClientBuilder::new(ClientConfig::new("127.0.0.1"))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::NoRuntime));
    }

    #[tokio::test]
    async fn test_build_rejects_empty_host() {
        let err = ClientBuilder::new(ClientConfig::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::EmptyHost));
    }

    #[tokio::test]
    async fn test_telemetry_bind_conflict_is_config_error() {
        // A plain socket without SO_REUSEADDR/SO_REUSEPORT blocks the port.
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut cfg = ClientConfig::new("127.0.0.1");
        cfg.telemetry = Some(TelemetryConfig {
            bind: blocker.local_addr().unwrap(),
            ..TelemetryConfig::default()
        });

        let err = ClientBuilder::new(cfg).build().err().unwrap();
        assert!(matches!(err, ConfigError::TelemetryBind { .. }));
    }
}
