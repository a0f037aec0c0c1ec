//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: supervisor, read loop, request path, keep-alive, subscription
//!   replay, telemetry listener, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the client's event listener, which fans out to user
//!   [`Subscribe`](crate::Subscribe) implementations such as
//!   [`LogWriter`](crate::LogWriter).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
