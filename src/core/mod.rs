//! Runtime core: connection supervision, request routing, subscriptions.
//!
//! The public API from this module is [`Client`], [`ClientBuilder`] and the
//! configuration types. Internal modules:
//! - [`supervisor`]: dials, serves and redials the device link;
//! - [`connection`]: read/write loops of one TCP session;
//! - [`router`]: correlation ids, pending requests, timeouts;
//! - [`registry`]: subscriptions, arm state per session epoch, value cache;
//! - [`fanout`]: bounded per-listener delivery shared with telemetry;
//! - [`keepalive`]: liveness probe that forces a reconnect when unanswered;
//! - [`state`]: the observable connection state cell.

mod builder;
mod client;
mod config;
mod connection;
pub(crate) mod fanout;
mod keepalive;
mod registry;
mod router;
mod state;
mod supervisor;

pub use builder::ClientBuilder;
pub use client::{Client, Subscription};
pub use config::{ClientConfig, DEFAULT_PORT, DEFAULT_TELEMETRY_PORT, TelemetryConfig};
pub(crate) use config::duration_ms;
pub use registry::SubscriptionHandle;
pub use state::ConnectionState;
