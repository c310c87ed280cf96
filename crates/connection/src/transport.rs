//! WebSocket transport wrapper.
//!
//! Owns the socket and its read/write/ping pump tasks. The manager
//! holds at most one live [`Transport`] at a time; dropping it cancels
//! the pumps.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use livelink_protocol::Frame;
use livelink_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::manager::Ctx;

/// Errors surfaced by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("not connected")]
    NotConnected,
}

/// A live WebSocket connection with its pump tasks.
pub(crate) struct Transport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Opens the WebSocket and spawns the pump tasks.
    pub(crate) async fn open(url: &str, ctx: Ctx) -> Result<Self, ConnectionError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();

        // Sized so a full offline queue always fits during the
        // connect-time flush.
        let channel_capacity = ctx.config.queue_capacity.max(256);
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(channel_capacity);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let ctx = ctx.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(read, ctx, write_tx, cancel))
        };

        let ping_handle = {
            let period = ctx.config.ping_interval;
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(period, write_tx, cancel))
        };

        Ok(Self {
            write_tx,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        })
    }

    /// Hands a frame to the write pump without waiting on the network.
    pub(crate) fn transmit(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let json = serde_json::to_string(frame)?;
        self.write_tx
            .try_send(tungstenite::Message::Text(json.into()))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Gracefully closes the connection. The write pump sends a normal
    /// close frame on its way out.
    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}
