//! WebSocket read pump that dispatches incoming frames.
//!
//! Correlated replies resolve their pending request; inbound pings are
//! answered with a pong; everything else is forwarded to the event
//! channel. When the stream ends the pump hands off to the
//! reconnection logic.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use livelink_protocol::Frame;
use livelink_protocol::constants::{FrameKind, WS_MAX_MESSAGE_SIZE};

use crate::manager::Ctx;
use crate::types::ConnectionEvent;

pub(crate) async fn read_pump<S>(
    mut read: S,
    ctx: Ctx,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => match msg {
                        tungstenite::Message::Text(text) => {
                            handle_text(&text, &ctx, &write_tx).await;
                        }
                        tungstenite::Message::Ping(data) => {
                            trace!("received transport ping, sending pong");
                            let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                        }
                        tungstenite::Message::Pong(_) => {
                            trace!("received transport pong");
                        }
                        tungstenite::Message::Close(_) => {
                            debug!("received close frame");
                            break;
                        }
                        _ => {} // Binary frames are ignored.
                    },
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        let _ = ctx
                            .events_tx
                            .try_send(ConnectionEvent::TransportError(e.to_string()));
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    crate::reconnection::handle_transport_loss(&ctx).await;
}

/// Parses a text message and dispatches the frame (or frames, for a
/// batch envelope). Malformed payloads are counted and discarded.
pub(crate) async fn handle_text(
    text: &str,
    ctx: &Ctx,
    write_tx: &mpsc::Sender<tungstenite::Message>,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to parse message: {e}");
            ctx.stats.record_parse_error();
            return;
        }
    };

    ctx.stats.record_received();

    if frame.kind == FrameKind::Batch {
        for inner in frame.messages.unwrap_or_default() {
            dispatch(inner, ctx, write_tx).await;
        }
        return;
    }
    dispatch(frame, ctx, write_tx).await;
}

async fn dispatch(frame: Frame, ctx: &Ctx, write_tx: &mpsc::Sender<tungstenite::Message>) {
    match frame.kind {
        FrameKind::Ping => {
            trace!("received ping, replying pong");
            if let Ok(json) = serde_json::to_string(&Frame::pong_for(&frame)) {
                let _ = write_tx.send(tungstenite::Message::Text(json.into())).await;
            }
        }
        FrameKind::Pong => {
            if let Ok(mut last) = ctx.last_pong.lock() {
                *last = Some(std::time::Instant::now());
            }
            // A pong only reaches a caller when it answers a pending probe.
            if let Err(frame) = ctx.pending.try_resolve(frame).await {
                trace!(id = ?frame.correlation_id(), "uncorrelated pong");
            }
        }
        _ => {
            if let Err(frame) = ctx.pending.try_resolve(frame).await {
                if ctx
                    .events_tx
                    .try_send(ConnectionEvent::MessageReceived(frame))
                    .is_err()
                {
                    warn!("event channel full, dropping inbound message");
                }
            }
        }
    }
}
