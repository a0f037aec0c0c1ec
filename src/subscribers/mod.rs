//! # Event subscribers and parameter listeners.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Supervisor / read loop / telemetry ── publish(Event) ──► Bus ──► SubscriberSet
//!                                                                     │
//!                                                    ┌────────────────┼──────────┐
//!                                                    ▼                ▼          ▼
//!                                                LogWriter         Metrics    Custom
//!
//! Parameter flow (callback form of subscribe):
//!   Registry ──► [bounded queue] ──► worker ──► UpdateListener::on_update
//! ```
//!
//! Both paths share the same isolation rules: dedicated worker per consumer,
//! bounded queue, panics caught and published as `SubscriberPanicked`.

mod embedded;
mod listener;
mod subscriber;
mod subscriber_set;

use std::future::Future;

use futures::FutureExt;

pub use embedded::LogWriter;
pub use listener::UpdateListener;
pub(crate) use listener::spawn_worker;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;

/// Runs `fut`, converting a panic into its message.
///
/// `AssertUnwindSafe` can leave shared state inconsistent if the consumer panics
/// while holding a lock; the worker keeps running regardless.
pub(crate) async fn catch_panic<F>(fut: F) -> Result<(), String>
where
    F: Future<Output = ()>,
{
    std::panic::AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic_err| {
            let any = &*panic_err;
            if let Some(msg) = any.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = any.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            }
        })
}
