//! Redial policies.
//!
//! This module groups the knobs that control **how long** the supervisor waits
//! between connection attempts and **whether** it keeps trying.
//!
//! ## Contents
//! - [`BackoffPolicy`] how redial delays evolve (first / factor / max / max_attempts + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized redials
//!
//! ## Quick wiring
//! ```text
//! ClientConfig { backoff: BackoffPolicy, telemetry: { backoff: BackoffPolicy } }
//!      ├─► core::supervisor uses backoff.next(attempt) between TCP dials
//!      └─► telemetry::listener uses its own policy between UDP rebinds
//! ```

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
