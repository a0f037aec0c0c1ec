//! # Subscription registry.
//!
//! The registry is the source of truth for which parameters must be subscribed
//! on the device. It outlives every connection: a disconnect only resets the
//! arm state, it never removes a subscription.
//!
//! ## Architecture
//! ```text
//! subscribe(param) ──► add() ──► Entry { listeners, last, arm }
//!                                   ▲            │
//! read loop ── update ──► deliver() ┘            └─► Fanout ─► listener queues
//!
//! on Connected(epoch):  claim(param, epoch) ─► `sub` ─► finish_arming()   (per param)
//! on Disconnected:      reset_all()  (every entry back to Unarmed)
//! ```
//!
//! ## Rules
//! - One device-level `sub` per parameter, however many handles share it.
//! - A parameter is armed **at most once per epoch**: whoever moves it out of
//!   `Unarmed` for that epoch (replay or a concurrent `subscribe`) owns the `sub`.
//! - An update equal to the last known value is not re-delivered.
//! - `remove()` is idempotent; removing the last handle drops the entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::core::fanout::Fanout;
use crate::protocol::ParamUpdate;

/// Opaque identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Numeric value, for logs.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Device-side state of one subscribed parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArmState {
    Unarmed,
    Arming(u64),
    Armed(u64),
}

struct Entry {
    listeners: Fanout<ParamUpdate>,
    handles: usize,
    last: Option<ParamUpdate>,
    arm: ArmState,
}

/// Result of [`Registry::add`].
pub(crate) struct Added {
    pub handle: SubscriptionHandle,
    pub rx: mpsc::Receiver<ParamUpdate>,
}

/// Result of [`Registry::remove`].
pub(crate) struct Removed {
    pub param: Arc<str>,
    /// `true` when this was the last handle; the device should be told `unsub`.
    pub last: bool,
}

/// Result of [`Registry::deliver`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Nobody subscribes to the parameter.
    Ignored,
    /// Same value as last time; nothing sent.
    Duplicate,
    /// Offered to every listener; `dropped` queues were full.
    Delivered { dropped: usize },
}

#[derive(Default)]
struct Inner {
    params: HashMap<Arc<str>, Entry>,
    handles: HashMap<SubscriptionHandle, Arc<str>>,
}

/// Registry of active parameter subscriptions.
pub(crate) struct Registry {
    inner: Mutex<Inner>,
    next_handle: AtomicU64,
    queue: usize,
}

impl Registry {
    /// Creates a registry whose listener queues hold `queue` updates each.
    pub(crate) fn new(queue: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_handle: AtomicU64::new(1),
            queue: queue.max(1),
        }
    }

    /// Registers a listener for `param`.
    ///
    /// If a value is already known for the parameter it is queued to the new
    /// listener immediately.
    pub(crate) fn add(&self, param: &Arc<str>) -> Added {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.lock();
        inner.handles.insert(handle, Arc::clone(param));

        let entry = inner
            .params
            .entry(Arc::clone(param))
            .or_insert_with(|| Entry {
                listeners: Fanout::new(),
                handles: 0,
                last: None,
                arm: ArmState::Unarmed,
            });
        entry.handles += 1;
        let rx = entry.listeners.attach(handle.0, self.queue);
        if let Some(last) = &entry.last {
            entry.listeners.send_to(handle.0, last);
        }
        Added { handle, rx }
    }

    /// Removes `handle`. Returns `None` if it is unknown or already removed.
    pub(crate) fn remove(&self, handle: SubscriptionHandle) -> Option<Removed> {
        let mut inner = self.lock();
        let param = inner.handles.remove(&handle)?;
        let last = match inner.params.get_mut(&param) {
            Some(entry) => {
                entry.listeners.detach(handle.0);
                entry.handles = entry.handles.saturating_sub(1);
                entry.handles == 0
            }
            None => true,
        };
        if last {
            inner.params.remove(&param);
        }
        Some(Removed { param, last })
    }

    /// Claims `param` for arming on `epoch`.
    ///
    /// Returns `false` when it is unknown or already armed (or arming) on `epoch`.
    pub(crate) fn claim(&self, param: &str, epoch: u64) -> bool {
        let mut inner = self.lock();
        match inner.params.get_mut(param) {
            Some(entry) if Self::claimable(entry.arm, epoch) => {
                entry.arm = ArmState::Arming(epoch);
                true
            }
            _ => false,
        }
    }

    /// Records the outcome of a `sub` issued for `epoch`.
    ///
    /// A failed arm returns the parameter to `Unarmed` so the next replay retries it.
    pub(crate) fn finish_arming(&self, param: &str, epoch: u64, ok: bool) {
        let mut inner = self.lock();
        if let Some(entry) = inner.params.get_mut(param) {
            if entry.arm == ArmState::Arming(epoch) {
                entry.arm = if ok {
                    ArmState::Armed(epoch)
                } else {
                    ArmState::Unarmed
                };
            }
        }
    }

    /// Marks every parameter `Unarmed`; called when a session ends.
    pub(crate) fn reset_all(&self) {
        let mut inner = self.lock();
        for entry in inner.params.values_mut() {
            entry.arm = ArmState::Unarmed;
        }
    }

    /// Delivers a pushed value to the listeners of its parameter.
    pub(crate) fn deliver(&self, update: ParamUpdate) -> Delivery {
        let mut inner = self.lock();
        let Some(entry) = inner.params.get_mut(&update.param) else {
            return Delivery::Ignored;
        };
        if entry.last.as_ref() == Some(&update) {
            return Delivery::Duplicate;
        }
        let dropped = entry.listeners.emit(&update);
        entry.last = Some(update);
        Delivery::Delivered { dropped }
    }

    /// Drops every subscription; all listener queues close.
    pub(crate) fn clear(&self) {
        *self.lock() = Inner::default();
    }

    /// Subscribed parameters, sorted.
    pub(crate) fn params(&self) -> Vec<Arc<str>> {
        let mut params: Vec<Arc<str>> = self.lock().params.keys().cloned().collect();
        params.sort();
        params
    }

    #[cfg(test)]
    pub(crate) fn arm_state(&self, param: &str) -> Option<ArmState> {
        self.lock().params.get(param).map(|entry| entry.arm)
    }

    fn claimable(arm: ArmState, epoch: u64) -> bool {
        match arm {
            ArmState::Unarmed => true,
            ArmState::Arming(e) | ArmState::Armed(e) => e != epoch,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Format;
    use serde_json::json;

    fn key(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    fn update(param: &str, v: serde_json::Value) -> ParamUpdate {
        ParamUpdate {
            param: key(param),
            value: v,
            fmt: Format::Val,
        }
    }

    #[tokio::test]
    async fn test_deliver_fans_out_and_dedupes() {
        let reg = Registry::new(8);
        let mut a = reg.add(&key("ZoneGain_0"));
        let mut b = reg.add(&key("ZoneGain_0"));

        assert_eq!(
            reg.deliver(update("ZoneGain_0", json!(-10.0))),
            Delivery::Delivered { dropped: 0 }
        );
        assert_eq!(reg.deliver(update("ZoneGain_0", json!(-10.0))), Delivery::Duplicate);
        assert_eq!(reg.deliver(update("ZoneMute_0", json!(1))), Delivery::Ignored);

        assert_eq!(a.rx.recv().await.unwrap().value, json!(-10.0));
        assert_eq!(b.rx.recv().await.unwrap().value, json!(-10.0));
        assert!(a.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_listener_gets_cached_value() {
        let reg = Registry::new(8);
        let _first = reg.add(&key("ZoneSource_2"));
        reg.deliver(update("ZoneSource_2", json!(4)));

        let mut late = reg.add(&key("ZoneSource_2"));
        assert_eq!(late.rx.recv().await.unwrap().value, json!(4));
    }

    #[test]
    fn test_remove_is_idempotent_and_reports_last_handle() {
        let reg = Registry::new(8);
        let a = reg.add(&key("ZoneGain_0"));
        let b = reg.add(&key("ZoneGain_0"));

        let first = reg.remove(a.handle).unwrap();
        assert!(!first.last);
        assert!(reg.remove(a.handle).is_none());

        let second = reg.remove(b.handle).unwrap();
        assert!(second.last);
        assert_eq!(&*second.param, "ZoneGain_0");
        assert!(reg.params().is_empty());
    }

    #[test]
    fn test_each_param_armed_once_per_epoch() {
        let reg = Registry::new(8);
        let _a = reg.add(&key("A"));
        let _b = reg.add(&key("B"));

        assert!(reg.claim("A", 1));
        assert!(reg.claim("B", 1));
        // A concurrent subscribe on the same epoch must not arm again.
        assert!(!reg.claim("A", 1));
        assert!(!reg.claim("unknown", 1));

        reg.finish_arming("A", 1, true);
        reg.finish_arming("B", 1, false);
        assert_eq!(reg.arm_state("A"), Some(ArmState::Armed(1)));
        assert_eq!(reg.arm_state("B"), Some(ArmState::Unarmed));
        assert!(!reg.claim("A", 1));
        assert!(reg.claim("B", 1));

        reg.reset_all();
        assert!(reg.claim("A", 2));
        assert_eq!(reg.params(), vec![key("A"), key("B")]);
    }

    #[test]
    fn test_stale_arming_result_is_ignored() {
        let reg = Registry::new(8);
        let _a = reg.add(&key("A"));
        assert!(reg.claim("A", 1));
        reg.reset_all();
        assert!(reg.claim("A", 2));

        reg.finish_arming("A", 1, true);
        assert_eq!(reg.arm_state("A"), Some(ArmState::Arming(2)));
    }

    #[test]
    fn test_full_listener_is_counted() {
        let reg = Registry::new(1);
        let _slow = reg.add(&key("ZoneMeter_0"));
        reg.deliver(update("ZoneMeter_0", json!(1)));
        assert_eq!(
            reg.deliver(update("ZoneMeter_0", json!(2))),
            Delivery::Delivered { dropped: 1 }
        );
    }
}
