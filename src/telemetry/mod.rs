//! UDP meter telemetry.
//!
//! - [`packet`]: datagram decoding into [`TelemetrySample`]s;
//! - [`listener`]: socket ownership, rebind on failure, fan-out to subscribers.

mod listener;
mod packet;

pub(crate) use listener::{TelemetryHub, bind};
pub use listener::TelemetrySubscription;
pub use packet::{DecodeError, TelemetrySample, decode_datagram};
