//! # dsplink
//!
//! **dsplink** is a long-lived, supervised client for audio processors that
//! expose a JSON-RPC-style command channel over TCP and a meter stream over UDP.
//!
//! Many independent consumers (HTTP handlers, pollers, diagnostics) share one
//! fragile physical link. The client keeps them consistent across faults:
//! requests are correlated and time out individually, subscriptions are
//! replayed after every reconnect, a keep-alive detects silently dead sessions,
//! and meters keep flowing while the command channel is down.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   get / set / subscribe / unsubscribe / telemetry          (any number of Client clones)
//!        │                      │                                   │
//!        ▼                      ▼                                   ▼
//! ┌──────────────┐     ┌──────────────────┐                ┌──────────────────┐
//! │    Router    │     │     Registry     │                │  Telemetry hub   │
//! │ ids, pending │     │ params, arm      │                │  UDP socket,     │
//! │ timeouts     │     │ state, cache     │                │  rebind/backoff  │
//! └──────┬───────┘     └────────┬─────────┘                └────────┬─────────┘
//!        │ frames               │ replay on Connected               │ samples
//!        ▼                      ▼                                   ▼
//! ┌───────────────────────────────────────────────┐        Fanout ─► subscriber queues
//! │ Supervisor (single owner of ConnectionState)  │
//! │  dial ─► serve ─► teardown ─► backoff ─► dial │
//! │  session: write_loop, read_loop, keep-alive   │
//! └───────────────────────┬───────────────────────┘
//!                         │ TCP, newline-delimited JSON
//!                         ▼
//!                      device
//! ```
//!
//! ### Events
//! ```text
//! Supervisor / read loop / router / telemetry ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                                              │
//!                                                                        SubscriberSet
//!                                                                    ┌─────────┼─────────┐
//!                                                                    ▼         ▼         ▼
//!                                                                LogWriter  metrics   custom
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                       |
//! |-------------------|---------------------------------------------------------------|------------------------------------------|
//! | **Client API**    | Concurrent get/set, subscriptions that survive reconnects.    | [`Client`], [`Subscription`]             |
//! | **Telemetry**     | UDP meter stream, independent failure domain.                 | [`TelemetrySubscription`], [`TelemetrySample`] |
//! | **Observability** | Runtime events fanned out to isolated subscribers.            | [`Subscribe`], [`Event`], [`LogWriter`]  |
//! | **Policies**      | Redial backoff with jitter and optional attempt budget.       | [`BackoffPolicy`], [`JitterPolicy`]      |
//! | **Errors**        | Typed errors with stable labels.                              | [`ClientError`], [`ConfigError`]         |
//! | **Configuration** | `serde`-loadable settings with sane defaults.                 | [`ClientConfig`], [`TelemetryConfig`]    |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use dsplink::{ClientBuilder, ClientConfig, LogWriter, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = ClientConfig::new("10.0.0.20");
//!     cfg.telemetry = Some(TelemetryConfig::default());
//!
//!     let client = ClientBuilder::new(cfg)
//!         .with_subscriber(Arc::new(LogWriter::new()))
//!         .build()?;
//!
//!     let gain = client.get("ZoneGain_0").await?;
//!     println!("zone 0 gain: {gain}");
//!
//!     let mut meters = client.telemetry().expect("telemetry configured");
//!     while let Some(sample) = meters.recv().await {
//!         println!("{}[{}] = {:.1} dB", sample.meter, sample.channel, sample.level);
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod core;
mod error;
mod events;
mod policies;
mod protocol;
mod subscribers;
mod telemetry;

// ---- Public re-exports ----

pub use crate::core::{
    Client, ClientBuilder, ClientConfig, ConnectionState, DEFAULT_PORT, DEFAULT_TELEMETRY_PORT,
    Subscription, SubscriptionHandle, TelemetryConfig,
};
pub use error::{ClientError, ConfigError, ProtocolError, ShutdownError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use protocol::{Format, Method, ParamUpdate, RpcError};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet, UpdateListener};
pub use telemetry::{DecodeError, TelemetrySample, TelemetrySubscription, decode_datagram};
