//! # Client: the public handle to one device.
//!
//! A [`Client`] is cheap to clone; every clone drives the same connection,
//! router and subscription registry. Build one with [`ClientBuilder`](crate::ClientBuilder).
//!
//! ## Request path
//! ```text
//! get/set/subscribe
//!   ├─► Closed if shutting down
//!   ├─► acquire in-flight permit (max_in_flight > 0)
//!   ├─► Link::wait_writer(queue_timeout)      ── NotConnected / Closed
//!   └─► Router::call(writer, request, request_timeout)
//!            └─► value | Device | Timeout | ConnectionLost
//! ```
//!
//! ## Shutdown path
//! ```text
//! shutdown()
//!   ├─► publish ShutdownRequested, stop admitting (drain token, semaphore closed)
//!   ├─► supervisor moves the link to Draining (session stays up)
//!   ├─► wait up to `grace` for in-flight requests
//!   │      ├─ idle     → DrainedWithinGrace
//!   │      └─ timeout  → GraceExceeded { stuck ids }
//!   ├─► cancel runtime: supervisor tears the session down, telemetry stops
//!   └─► fail leftovers with Closed, close listener queues, flush subscribers
//! ```
//!
//! ## Example
//! ```no_run
//! use dsplink::{ClientBuilder, ClientConfig};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new(ClientConfig::new("10.0.0.20")).build()?;
//!
//!     client.set("ZoneGain_0", json!(-20.0)).await?;
//!     let mut gain = client.subscribe("ZoneGain_0").await?;
//!     if let Some(update) = gain.recv().await {
//!         println!("{} = {}", update.param, update.value);
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::core::connection;
use crate::core::registry::{Registry, SubscriptionHandle};
use crate::core::router::Router;
use crate::core::state::{ConnectionState, Link, WriterHandle};
use crate::core::ClientConfig;
use crate::error::{ClientError, ShutdownError};
use crate::events::{Bus, Event, EventKind};
use crate::protocol::{Format, Method, ParamUpdate, Request};
use crate::subscribers::{UpdateListener, spawn_worker};
use crate::telemetry::{TelemetryHub, TelemetrySubscription};

/// Background tasks owned by a client, joined on shutdown.
pub(crate) struct Tasks {
    pub supervisor: JoinHandle<()>,
    pub telemetry: Option<JoinHandle<()>>,
    pub events: JoinHandle<()>,
    /// Stops the event listener once every publisher has finished.
    pub events_stop: CancellationToken,
}

/// State shared by the client handles, the supervisor and the session tasks.
pub(crate) struct Shared {
    pub cfg: ClientConfig,
    pub addr: SocketAddr,
    pub bus: Bus,
    pub link: Link,
    pub router: Router,
    pub registry: Registry,
    pub telemetry: Option<Arc<TelemetryHub>>,
    pub permits: Option<Arc<Semaphore>>,
    /// Serializes arming (`sub`) and `unsub` so their frames reach the device
    /// in the order the registry changed.
    pub arm_gate: tokio::sync::Mutex<()>,
    /// Cancelled by `shutdown()`: stop admitting, stop redialing.
    pub drain: CancellationToken,
    /// Cancelled after the grace period: tear everything down.
    pub runtime: CancellationToken,
    pub tasks: Mutex<Option<Tasks>>,
}

impl Shared {
    /// Builds a request with a fresh correlation id.
    pub(crate) fn request(&self, method: Method, param: Arc<str>) -> Request {
        Request::new(self.router.next_id(), method, param)
    }

    /// Sends `request` on a specific session.
    pub(crate) async fn send_on(
        &self,
        writer: &WriterHandle,
        request: Request,
    ) -> Result<Value, ClientError> {
        self.router
            .call(&writer.tx, request, self.cfg.request_timeout, &self.bus)
            .await
    }

    /// Issues `sub` for `param` on `writer`'s session, which must hold the arm claim.
    pub(crate) async fn arm(&self, writer: &WriterHandle, param: &Arc<str>) -> Result<(), ClientError> {
        let request = self.request(Method::Sub, Arc::clone(param));
        match self.send_on(writer, request).await {
            Ok(value) => {
                self.registry.finish_arming(param, writer.epoch, true);
                if !value.is_null() {
                    connection::deliver(
                        self,
                        ParamUpdate {
                            param: Arc::clone(param),
                            value,
                            fmt: Format::Val,
                        },
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.registry.finish_arming(param, writer.epoch, false);
                Err(e)
            }
        }
    }

    async fn admit(&self) -> Result<(Option<OwnedSemaphorePermit>, WriterHandle), ClientError> {
        if self.drain.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let permit = match &self.permits {
            Some(sem) => Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .map_err(|_| ClientError::Closed)?,
            ),
            None => None,
        };
        let writer = self.link.wait_writer(self.cfg.queue_timeout).await?;
        Ok((permit, writer))
    }

    async fn exchange(&self, request: Request) -> Result<Value, ClientError> {
        let (_permit, writer) = self.admit().await?;
        self.send_on(&writer, request).await
    }
}

/// Receiving end of one parameter subscription.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<ParamUpdate>,
}

impl Subscription {
    /// Handle to pass to [`Client::unsubscribe`].
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Waits for the next pushed value; `None` once unsubscribed or shut down.
    pub async fn recv(&mut self) -> Option<ParamUpdate> {
        self.rx.recv().await
    }

    /// Returns a queued value without waiting.
    pub fn try_recv(&mut self) -> Option<ParamUpdate> {
        self.rx.try_recv().ok()
    }

    /// Splits into the handle and the underlying queue.
    pub fn into_parts(self) -> (SubscriptionHandle, mpsc::Receiver<ParamUpdate>) {
        (self.handle, self.rx)
    }
}

/// Handle to a supervised device connection.
///
/// Background tasks keep running until [`Client::shutdown`] is called (or the
/// runtime stops); dropping the last clone does not stop them.
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<Shared>,
}

impl Client {
    /// Reads `param` in its native representation.
    pub async fn get(&self, param: &str) -> Result<Value, ClientError> {
        let request = self.shared.request(Method::Get, Arc::from(param));
        self.shared.exchange(request).await
    }

    /// Reads `param` in the requested representation.
    pub async fn get_with(&self, param: &str, fmt: Format) -> Result<Value, ClientError> {
        let request = self
            .shared
            .request(Method::Get, Arc::from(param))
            .with_format(fmt);
        self.shared.exchange(request).await
    }

    /// Writes `param`; returns the value echoed by the device.
    pub async fn set(&self, param: &str, value: impl Into<Value>) -> Result<Value, ClientError> {
        let request = self
            .shared
            .request(Method::Set, Arc::from(param))
            .with_value(value.into());
        self.shared.exchange(request).await
    }

    /// Subscribes to pushed values of `param`.
    ///
    /// When connected the device is subscribed before this returns; otherwise the
    /// subscription is recorded and armed on the next connection. The
    /// subscription survives reconnects until [`Client::unsubscribe`].
    ///
    /// # Errors
    /// - [`ClientError::Closed`] while shutting down;
    /// - [`ClientError::Device`] if the device rejects the parameter (nothing is recorded).
    pub async fn subscribe(&self, param: &str) -> Result<Subscription, ClientError> {
        if self.shared.drain.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let param: Arc<str> = Arc::from(param);
        let added = self.shared.registry.add(&param);
        self.arm_now(&param, added.handle).await?;
        Ok(Subscription {
            handle: added.handle,
            rx: added.rx,
        })
    }

    /// Subscribes `listener` to `param`; it runs on its own worker task.
    pub async fn subscribe_with(
        &self,
        param: &str,
        listener: Arc<dyn UpdateListener>,
    ) -> Result<SubscriptionHandle, ClientError> {
        let (handle, rx) = self.subscribe(param).await?.into_parts();
        spawn_worker(listener, rx, self.shared.bus.clone());
        Ok(handle)
    }

    /// Removes a subscription. Returns `false` if the handle was already removed.
    ///
    /// The device is told `unsub` when the last handle of a parameter goes away;
    /// a failure there is reported as `UnsubscribeFailed` and not returned. A
    /// concurrent `subscribe` of the same parameter waits until the `unsub` is
    /// answered, then arms it again.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let _gate = self.shared.arm_gate.lock().await;
        let Some(removed) = self.shared.registry.remove(handle) else {
            return false;
        };
        if removed.last {
            if let Some(writer) = self.shared.link.writer() {
                let request = self.shared.request(Method::Unsub, Arc::clone(&removed.param));
                if let Err(e) = self.shared.send_on(&writer, request).await {
                    self.shared.bus.publish(
                        Event::new(EventKind::UnsubscribeFailed)
                            .with_param(removed.param)
                            .with_reason(e.to_string()),
                    );
                }
            }
        }
        true
    }

    /// Subscribes to meter telemetry; `None` when telemetry is not configured.
    pub fn telemetry(&self) -> Option<TelemetrySubscription> {
        self.shared.telemetry.as_ref().map(|hub| hub.subscribe())
    }

    /// Local address of the telemetry socket.
    pub fn telemetry_local_addr(&self) -> Option<SocketAddr> {
        self.shared.telemetry.as_ref().map(|hub| hub.local_addr())
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        self.shared.link.state()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.link.watch()
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.shared.router.in_flight()
    }

    /// Parameters currently subscribed, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared
            .registry
            .params()
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    /// Address the supervisor dials.
    pub fn device_addr(&self) -> SocketAddr {
        self.shared.addr
    }

    /// Gracefully shuts the client down. Later calls return `Ok(())` immediately.
    ///
    /// # Errors
    /// [`ShutdownError::GraceExceeded`] if requests were still in flight when
    /// `grace` ran out; they are failed with [`ClientError::Closed`].
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let tasks = self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tasks) = tasks else {
            return Ok(());
        };
        let shared = &self.shared;

        shared.bus.publish(Event::new(EventKind::ShutdownRequested));
        shared.drain.cancel();
        if let Some(sem) = &shared.permits {
            sem.close();
        }

        let grace = shared.cfg.grace;
        let result = match time::timeout(grace, shared.router.wait_idle()).await {
            Ok(()) => {
                shared.bus.publish(Event::new(EventKind::DrainedWithinGrace));
                Ok(())
            }
            Err(_) => {
                let stuck = shared.router.ids();
                shared
                    .bus
                    .publish(Event::new(EventKind::GraceExceeded).with_count(stuck.len()));
                Err(ShutdownError::GraceExceeded { grace, stuck })
            }
        };

        shared.runtime.cancel();
        let _ = tasks.supervisor.await;
        if let Some(telemetry) = tasks.telemetry {
            let _ = telemetry.await;
        }
        shared.router.fail_all(|| ClientError::Closed);
        shared.registry.clear();
        if let Some(hub) = &shared.telemetry {
            hub.close();
        }

        tasks.events_stop.cancel();
        let _ = tasks.events.await;
        result
    }

    /// Arms a fresh subscription on the current session, if any.
    ///
    /// Waits behind any arm or `unsub` in progress, so a rejected parameter is
    /// reported to every concurrent subscriber.
    async fn arm_now(&self, param: &Arc<str>, handle: SubscriptionHandle) -> Result<(), ClientError> {
        let _gate = self.shared.arm_gate.lock().await;
        let Some(writer) = self.shared.link.writer() else {
            return Ok(());
        };
        if !self.shared.registry.claim(param, writer.epoch) {
            return Ok(());
        }
        match self.shared.arm(&writer, param).await {
            Ok(()) => Ok(()),
            Err(ClientError::Device(e)) => {
                self.shared.registry.remove(handle);
                Err(ClientError::Device(e))
            }
            Err(e) => {
                self.shared.bus.publish(
                    Event::new(EventKind::ReplayFailed)
                        .with_param(Arc::clone(param))
                        .with_reason(e.to_string()),
                );
                Ok(())
            }
        }
    }
}
