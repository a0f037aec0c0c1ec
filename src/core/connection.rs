//! # Session I/O: the read and write loops of one TCP connection.
//!
//! ```text
//! OwnedReadHalf ──read_buf──► LineFramer ──► decode ──┬─► Response ──► Router::resolve
//!                                                     ├─► Updates  ──► Registry::deliver
//!                                                     └─► error    ──► ProtocolAnomaly (frame dropped)
//!
//! mpsc<Bytes> ──► write_all ──► OwnedWriteHalf      (single writer: frames never interleave)
//! ```
//!
//! Both loops return a human-readable reason when the session ends; the
//! supervisor reports it in the `Disconnected` event.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::core::client::Shared;
use crate::core::registry::Delivery;
use crate::error::{ClientError, ProtocolError};
use crate::events::{Event, EventKind};
use crate::protocol::{self, Frame, Incoming, LineFramer, ParamUpdate};

/// Drains the write queue onto the socket.
pub(crate) async fn write_loop(mut wr: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>) -> String {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = wr.write_all(&frame).await {
            return format!("write failed: {e}");
        }
    }
    "write queue closed".to_string()
}

/// Reads frames until EOF or a socket error.
pub(crate) async fn read_loop(mut rd: OwnedReadHalf, shared: &Shared) -> String {
    let max = shared.cfg.max_frame_len;
    let mut framer = LineFramer::new(max);
    loop {
        match rd.read_buf(framer.buffer_mut()).await {
            Ok(0) => return "device closed the connection".to_string(),
            Ok(_) => {}
            Err(e) => return format!("read failed: {e}"),
        }
        while let Some(frame) = framer.next_frame() {
            match frame {
                Frame::Line(line) => dispatch(shared, &line),
                Frame::Discarded(len) => anomaly(shared, ProtocolError::FrameTooLong { len, max }),
            }
        }
    }
}

/// Routes one decoded frame.
pub(crate) fn dispatch(shared: &Shared, line: &[u8]) {
    match protocol::decode(line) {
        Ok(Incoming::Response { id, outcome }) => {
            let outcome = outcome
                .map(protocol::result_value)
                .map_err(ClientError::Device);
            if !shared.router.resolve(id, outcome) {
                anomaly(shared, ProtocolError::UnmatchedId { id });
            }
        }
        Ok(Incoming::Updates(updates)) => {
            for update in updates {
                deliver(shared, update);
            }
        }
        Err(e) => anomaly(shared, e),
    }
}

/// Hands a pushed value to the registry, reporting full listener queues.
pub(crate) fn deliver(shared: &Shared, update: ParamUpdate) {
    let param = update.param.clone();
    if let Delivery::Delivered { dropped } = shared.registry.deliver(update) {
        if dropped > 0 {
            shared.bus.publish(
                Event::new(EventKind::ListenerOverflow)
                    .with_param(param)
                    .with_count(dropped),
            );
        }
    }
}

fn anomaly(shared: &Shared, err: ProtocolError) {
    let mut ev = Event::new(EventKind::ProtocolAnomaly).with_reason(err.to_string());
    if let ProtocolError::UnmatchedId { id } = err {
        ev = ev.with_id(id);
    }
    shared.bus.publish(ev);
}
