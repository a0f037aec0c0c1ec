//! # Callback-style parameter listeners.
//!
//! [`UpdateListener`] is the callback form of a subscription. The client never
//! calls it from the socket read loop: updates go through the listener's own
//! bounded queue and a dedicated worker invokes [`UpdateListener::on_update`].
//!
//! ```text
//! read loop ──► Registry ──try_send──► [queue] ──► worker ──► listener.on_update()
//!                                                    └─► panic → SubscriberPanicked
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::{Bus, Event};
use crate::protocol::ParamUpdate;
use crate::subscribers::catch_panic;

/// Receives pushed values for one subscribed parameter.
#[async_trait]
pub trait UpdateListener: Send + Sync + 'static {
    /// Handles one update, in FIFO order.
    async fn on_update(&self, update: &ParamUpdate);

    /// Name used in panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Drains `rx` into `listener` until the queue closes (on unsubscribe).
pub(crate) fn spawn_worker(
    listener: Arc<dyn UpdateListener>,
    mut rx: mpsc::Receiver<ParamUpdate>,
    bus: Bus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Err(info) = catch_panic(listener.on_update(&update)).await {
                bus.publish(Event::subscriber_panicked(
                    listener.name(),
                    format!("param={} {info}", update.param),
                ));
            }
        }
    })
}
