//! One subscriber connection: the transport side of a session.
//!
//! The hub owns the session's queue; these two tasks own the split socket.
//! The write loop drains the outbound queue to binary frames in FIFO order
//! and turns a closed queue (eviction, rejection, shutdown) into a close
//! frame. The read loop exists to detect liveness and peer close: the
//! channel is broadcast-only, so inbound frames are read and discarded, but
//! every one of them refreshes the liveness deadline.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::hub::{HubHandle, SessionId};

/// Read deadline; refreshed by any inbound frame, keepalive pings included.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Inbound read limit. Subscribers have nothing to say beyond keepalives.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Start the session's two task loops over an upgraded socket.
///
/// The hub must already hold the registered [`SessionHandle`] whose
/// receiver is `outbound`.
///
/// [`SessionHandle`]: crate::hub::SessionHandle
pub fn spawn(socket: WebSocket, id: SessionId, outbound: mpsc::Receiver<Bytes>, hub: HubHandle) {
    let (sink, stream) = socket.split();
    tokio::spawn(write_loop(sink, outbound, id, hub.clone()));
    tokio::spawn(read_loop(stream, id, hub));
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    id: SessionId,
    hub: HubHandle,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Binary(frame)).await {
            debug!(session = %id, error = %e, "transport write failed");
            hub.unregister(id);
            return;
        }
    }
    // Queue closed by the hub. Best-effort goodbye; the peer may already
    // be gone.
    let _ = sink.send(Message::Close(None)).await;
    debug!(session = %id, "outbound queue closed, write loop done");
}

async fn read_loop(mut stream: SplitStream<WebSocket>, id: SessionId, hub: HubHandle) {
    loop {
        match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                debug!(session = %id, "liveness deadline missed");
                break;
            }
            Ok(None) => {
                debug!(session = %id, "transport closed");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(session = %id, error = %e, "transport read failed");
                break;
            }
            Ok(Some(Ok(Message::Close(_)))) => {
                debug!(session = %id, "peer sent close");
                break;
            }
            Ok(Some(Ok(_))) => {
                // Keepalive or client chatter on a broadcast-only channel:
                // the read itself refreshed the deadline, nothing to do.
            }
        }
    }
    hub.unregister(id);
}
