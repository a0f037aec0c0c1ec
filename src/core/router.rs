//! # Request router: correlation ids and pending requests.
//!
//! Every outgoing command gets a fresh id from a monotonic counter and a
//! pending entry holding a `oneshot` result slot. The read loop resolves the
//! entry when a response with the same id arrives.
//!
//! ## Resolution
//! A pending request resolves **exactly once**. Whoever removes the entry from
//! the map owns the slot:
//! - read loop: response or device error;
//! - caller: timeout (the connection stays up);
//! - supervisor: `ConnectionLost` on teardown, `Closed` on shutdown;
//! - drop guard: the caller's future was dropped (the written command is not retracted).
//!
//! ```text
//! call() ─► register(id) ─► writer.send(frame) ─► await slot ──┬─► response   (read loop)
//!                                                              ├─► Timeout    (expire)
//!                                                              └─► Lost/Closed (fail_all)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time;

use crate::error::ClientError;
use crate::events::{Bus, Event, EventKind};
use crate::protocol::Request;

type Slot = oneshot::Sender<Result<Value, ClientError>>;

/// Correlates responses with in-flight requests.
pub(crate) struct Router {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Slot>>,
    idle: Notify,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            idle: Notify::new(),
        }
    }

    /// Allocates the next correlation id.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, id: u64) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (slot, rx) = oneshot::channel();
        self.lock().insert(id, slot);
        rx
    }

    fn take(&self, id: u64) -> Option<Slot> {
        let mut map = self.lock();
        let taken = map.remove(&id);
        if taken.is_some() && map.is_empty() {
            self.idle.notify_waiters();
        }
        taken
    }

    /// Resolves `id` with `outcome`. Returns `false` for an unknown id.
    pub(crate) fn resolve(&self, id: u64, outcome: Result<Value, ClientError>) -> bool {
        match self.take(id) {
            Some(slot) => {
                let _ = slot.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Frees `id` without resolving it. Returns `false` if someone else already did.
    pub(crate) fn expire(&self, id: u64) -> bool {
        self.take(id).is_some()
    }

    /// Fails every pending request; returns how many were failed.
    pub(crate) fn fail_all(&self, err: impl Fn() -> ClientError) -> usize {
        let drained: Vec<Slot> = {
            let mut map = self.lock();
            map.drain().map(|(_, slot)| slot).collect()
        };
        self.idle.notify_waiters();
        let n = drained.len();
        for slot in drained {
            let _ = slot.send(Err(err()));
        }
        n
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Sorted ids still in flight.
    pub(crate) fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Completes once no request is in flight.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Sends `request` through `writer` and waits up to `timeout` for its response.
    ///
    /// The timeout covers queueing behind other frames as well as the device's reply.
    pub(crate) async fn call(
        &self,
        writer: &mpsc::Sender<Bytes>,
        request: Request,
        timeout: Duration,
        bus: &Bus,
    ) -> Result<Value, ClientError> {
        let id = request.id;
        let frame = request.encode()?;
        let mut slot = self.register(id);
        let _guard = PendingGuard { router: self, id };

        let exchange = async {
            if writer.send(frame).await.is_err() {
                return Err(ClientError::ConnectionLost);
            }
            (&mut slot).await.unwrap_or(Err(ClientError::ConnectionLost))
        };
        let outcome = time::timeout(timeout, exchange).await;

        match outcome {
            Ok(result) => result,
            Err(_elapsed) if self.expire(id) => {
                bus.publish(
                    Event::new(EventKind::RequestTimedOut)
                        .with_id(id)
                        .with_param(Arc::clone(&request.param))
                        .with_timeout(timeout),
                );
                Err(ClientError::Timeout { id, timeout })
            }
            // Resolved concurrently with the deadline; the slot is (about to be) filled.
            Err(_elapsed) => slot.await.unwrap_or(Err(ClientError::ConnectionLost)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Slot>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frees the pending entry when the caller's future is dropped.
struct PendingGuard<'a> {
    router: &'a Router,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.router.take(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;
    use serde_json::json;

    fn request(router: &Router, param: &str) -> Request {
        Request::new(router.next_id(), Method::Get, param)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let router = Router::new();
        let a = router.next_id();
        let b = router.next_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn test_response_resolves_matching_request() {
        let router = Arc::new(Router::new());
        let bus = Bus::new(8);
        let (tx, mut rx) = mpsc::channel(8);

        let call = {
            let router = router.clone();
            let req = request(&router, "ZoneGain_0");
            tokio::spawn(async move { router.call(&tx, req, Duration::from_secs(5), &bus).await })
        };

        let frame = rx.recv().await.unwrap();
        let sent: Value = serde_json::from_slice(&frame).unwrap();
        let id = sent["id"].as_u64().unwrap();
        assert_eq!(router.in_flight(), 1);

        assert!(router.resolve(id, Ok(json!(-20.0))));
        assert_eq!(call.await.unwrap().unwrap(), json!(-20.0));
        assert_eq!(router.in_flight(), 0);
        assert!(!router.resolve(id, Ok(json!(0))), "second resolution must be rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_entry_and_publishes_event() {
        let router = Router::new();
        let bus = Bus::new(8);
        let mut events = bus.subscribe();
        let (tx, _rx) = mpsc::channel(8);

        let req = request(&router, "ZoneMute_1");
        let id = req.id;
        let err = router
            .call(&tx, req, Duration::from_millis(100), &bus)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Timeout { id: got, .. } if got == id));
        assert_eq!(router.in_flight(), 0);
        let ev = events.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::RequestTimedOut);
        assert_eq!(ev.param.as_deref(), Some("ZoneMute_1"));
        assert!(!router.resolve(id, Ok(Value::Null)), "late response is unmatched");
    }

    #[tokio::test]
    async fn test_closed_writer_reports_connection_lost() {
        let router = Router::new();
        let bus = Bus::new(8);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let req = request(&router, "ZoneGain_0");
        let err = router
            .call(&tx, req, Duration::from_secs(1), &bus)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionLost));
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_request_once() {
        let router = Arc::new(Router::new());
        let bus = Bus::new(8);
        let (tx, mut rx) = mpsc::channel(16);

        let mut calls = Vec::new();
        for i in 0..5 {
            let router = router.clone();
            let tx = tx.clone();
            let bus = bus.clone();
            let req = request(&router, &format!("ZoneGain_{i}"));
            calls.push(tokio::spawn(async move {
                router.call(&tx, req, Duration::from_secs(5), &bus).await
            }));
        }
        for _ in 0..5 {
            rx.recv().await.unwrap();
        }

        assert_eq!(router.fail_all(|| ClientError::ConnectionLost), 5);
        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(ClientError::ConnectionLost)));
        }
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_frees_entry() {
        let router = Arc::new(Router::new());
        let bus = Bus::new(8);
        let (tx, mut rx) = mpsc::channel(8);

        let call = {
            let router = router.clone();
            let req = request(&router, "ZoneGain_0");
            tokio::spawn(async move { router.call(&tx, req, Duration::from_secs(5), &bus).await })
        };
        rx.recv().await.unwrap();
        assert_eq!(router.ids().len(), 1);

        call.abort();
        let _ = call.await;
        assert_eq!(router.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_completes_after_last_resolution() {
        let router = Arc::new(Router::new());
        let _rx = router.register(1);
        let _rx2 = router.register(2);

        let waiter = {
            let router = router.clone();
            tokio::spawn(async move { router.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        router.resolve(1, Ok(Value::Null));
        router.resolve(2, Ok(Value::Null));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
