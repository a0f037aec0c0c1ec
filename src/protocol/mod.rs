//! Wire protocol: framing and the JSON-RPC-style envelope.
//!
//! ## Contents
//! - [`LineFramer`] splits the TCP byte stream into newline-terminated frames
//! - [`Request`], [`decode`], [`Incoming`] encode commands and classify replies
//!
//! ```text
//! socket bytes ──► LineFramer ──► Frame::Line ──► decode() ──► Incoming::Response ──► Router
//!                                                          └─► Incoming::Updates  ──► Registry
//! ```

mod framer;
mod message;

pub use framer::{Frame, LineFramer};
pub use message::{
    Format, Incoming, Method, ParamUpdate, Request, RpcError, decode, result_value,
};
