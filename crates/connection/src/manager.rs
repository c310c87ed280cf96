//! Connection manager owning one logical WebSocket connection.
//!
//! Accepts outbound frames regardless of connection state, reconnects
//! with exponential backoff after abnormal closures, and matches
//! correlated replies (acks, health checks, latency probes) to waiting
//! callers through one pending-request table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livelink_protocol::Frame;

use crate::batch::Batcher;
use crate::pending::PendingTable;
use crate::queue::OutboundQueue;
use crate::reconnection;
use crate::stats::{ConnectionStats, StatsSnapshot};
use crate::transport::{ConnectionError, Transport};
use crate::types::{ConnectionEvent, ConnectionState, ManagerConfig, SendStatus};

/// Shared state passed to the pumps and the reconnect loop. Avoids
/// threading a dozen separate Arc parameters.
#[derive(Clone)]
pub(crate) struct Ctx {
    pub(crate) config: Arc<ManagerConfig>,
    pub(crate) state: Arc<RwLock<ConnectionState>>,
    pub(crate) transport: Arc<Mutex<Option<Transport>>>,
    /// Serializes transport opens so only one handle can ever be live.
    pub(crate) connect_gate: Arc<Mutex<()>>,
    pub(crate) queue: Arc<Mutex<OutboundQueue>>,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) batcher: Arc<Batcher>,
    pub(crate) stats: Arc<ConnectionStats>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    pub(crate) reconnect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) manual_disconnect: Arc<AtomicBool>,
    pub(crate) attempts: Arc<AtomicU32>,
    pub(crate) last_pong: Arc<std::sync::Mutex<Option<Instant>>>,
}

/// Connection manager for one streaming endpoint.
pub struct ConnectionManager {
    ctx: Ctx,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    /// Creates a new manager. No connection is opened until
    /// [`connect`](Self::connect) is called.
    pub fn new(config: ManagerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let queue = OutboundQueue::new(config.queue_capacity);

        let ctx = Ctx {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            transport: Arc::new(Mutex::new(None)),
            connect_gate: Arc::new(Mutex::new(())),
            queue: Arc::new(Mutex::new(queue)),
            pending: Arc::new(PendingTable::default()),
            batcher: Arc::new(Batcher::new()),
            stats: Arc::new(ConnectionStats::default()),
            events_tx,
            reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
            manual_disconnect: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(0)),
            last_pong: Arc::new(std::sync::Mutex::new(None)),
        };

        Self {
            ctx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.ctx.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await.is_connected()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Arrival time of the most recent pong, if any was received.
    pub fn last_pong(&self) -> Option<Instant> {
        self.ctx.last_pong.lock().ok().and_then(|guard| *guard)
    }

    /// Number of frames parked in the outbound queue.
    pub async fn queued_len(&self) -> usize {
        self.ctx.queue.lock().await.len()
    }

    /// Opens the connection. No-op when already connecting or
    /// connected. On success the queue is flushed oldest-first before
    /// any newly issued send transmits. A failed open schedules an
    /// automatic reconnect and returns the error.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        {
            let state = *self.ctx.state.read().await;
            if matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Ok(());
            }
        }

        self.ctx.manual_disconnect.store(false, Ordering::Relaxed);
        reconnection::cancel_reconnect(&self.ctx.reconnect_cancel);

        match establish(&self.ctx).await {
            Ok(()) => {
                info!(url = %self.ctx.config.url, "connected");
                Ok(())
            }
            Err(e) => {
                warn!(url = %self.ctx.config.url, error = %e, "connect failed");
                let _ = self
                    .ctx
                    .events_tx
                    .try_send(ConnectionEvent::TransportError(e.to_string()));
                reconnection::spawn_reconnect(self.ctx.clone());
                Err(e)
            }
        }
    }

    /// Opens the connection only when neither connected nor connecting.
    /// Cheap guard for callers that don't track state themselves.
    pub async fn ensure_connection(&self) -> Result<(), ConnectionError> {
        let state = *self.ctx.state.read().await;
        if matches!(
            state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Ok(());
        }
        self.connect().await
    }

    /// Gracefully closes the connection: cancels the reconnect and
    /// liveness timers, cancels pending requests, and sends a normal
    /// close frame. Does not auto-reconnect.
    pub async fn disconnect(&self) {
        self.ctx.manual_disconnect.store(true, Ordering::Relaxed);
        reconnection::cancel_reconnect(&self.ctx.reconnect_cancel);
        self.ctx.pending.cancel_all().await;

        let transport = self.ctx.transport.lock().await.take();
        if let Some(t) = transport {
            *self.ctx.state.write().await = ConnectionState::Closing;
            t.close().await;
        }

        let mut state = self.ctx.state.write().await;
        if *state != ConnectionState::Disconnected {
            *state = ConnectionState::Disconnected;
            drop(state);
            let _ = self
                .ctx
                .events_tx
                .try_send(ConnectionEvent::StateChanged { connected: false });
            debug!("disconnected");
        }
    }

    /// Sends a frame, or parks it in the bounded queue while
    /// disconnected. Never blocks on the network and never fails for a
    /// disconnected state. In batching mode the frame may be absorbed
    /// into the current batch window.
    pub async fn send(&self, frame: Frame) -> SendStatus {
        send_inner(&self.ctx, frame, false).await
    }

    /// Sends a frame immediately, bypassing the batching window.
    pub async fn send_priority(&self, frame: Frame) -> SendStatus {
        send_inner(&self.ctx, frame, true).await
    }

    /// Sends a frame stamped with a fresh `messageId` and waits for the
    /// correlated reply. While disconnected the frame is queued and the
    /// timeout keeps running.
    pub async fn send_with_ack(
        &self,
        mut frame: Frame,
        timeout: Duration,
    ) -> Result<Frame, ConnectionError> {
        let id = uuid::Uuid::new_v4().to_string();
        frame.message_id = Some(id.clone());
        self.request(frame, id, timeout).await
    }

    /// Sends a liveness probe and waits for the correlated pong.
    /// Fails immediately when not connected; a timeout leaves the
    /// connection state untouched.
    pub async fn health_check(&self, timeout: Duration) -> Result<(), ConnectionError> {
        if !self.is_connected().await {
            return Err(ConnectionError::NotConnected);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let frame = Frame::health_probe(id.as_str());
        self.request(frame, id, timeout).await.map(|_| ())
    }

    /// Measures round-trip time to the peer via a correlated probe.
    pub async fn measure_latency(&self, timeout: Duration) -> Result<Duration, ConnectionError> {
        if !self.is_connected().await {
            return Err(ConnectionError::NotConnected);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        let frame = Frame::latency_probe(id.as_str());
        self.request(frame, id, timeout).await.map(|_| started.elapsed())
    }

    /// Registers a pending request, sends the frame with priority, and
    /// waits for the correlated reply or the timeout.
    async fn request(
        &self,
        frame: Frame,
        id: String,
        timeout: Duration,
    ) -> Result<Frame, ConnectionError> {
        let rx = self.ctx.pending.register(id.clone()).await;
        send_inner(&self.ctx, frame, true).await;

        let result = tokio::time::timeout(timeout, rx).await;

        // Clean up the pending entry on any exit path.
        self.ctx.pending.discard(&id).await;

        match result {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }
}

/// Opens the transport and finalizes the connected state. The queue
/// lock is held across the state flip and the flush so frames parked
/// while disconnected always precede newly issued sends.
pub(crate) async fn establish(ctx: &Ctx) -> Result<(), ConnectionError> {
    let _gate = ctx.connect_gate.lock().await;
    if *ctx.state.read().await == ConnectionState::Connected {
        return Ok(());
    }
    *ctx.state.write().await = ConnectionState::Connecting;

    let transport = match Transport::open(&ctx.config.url, ctx.clone()).await {
        Ok(t) => t,
        Err(e) => {
            *ctx.state.write().await = ConnectionState::Disconnected;
            return Err(e);
        }
    };

    let mut queue = ctx.queue.lock().await;
    let mut slot = ctx.transport.lock().await;
    *slot = Some(transport);
    ctx.attempts.store(0, Ordering::SeqCst);
    *ctx.state.write().await = ConnectionState::Connected;
    let _ = ctx
        .events_tx
        .try_send(ConnectionEvent::StateChanged { connected: true });

    if !queue.is_empty() {
        debug!(count = queue.len(), "flushing queued messages");
        if let Some(t) = slot.as_ref() {
            for frame in queue.drain() {
                if t.transmit(&frame).is_ok() {
                    ctx.stats.record_sent();
                }
            }
        }
    }

    Ok(())
}

/// Transmits on the live connection, or parks the frame in the bounded
/// queue. The queue lock serializes this against the connect-time
/// flush.
pub(crate) async fn transmit_or_queue(ctx: &Ctx, frame: Frame) -> SendStatus {
    let mut queue = ctx.queue.lock().await;

    if *ctx.state.read().await == ConnectionState::Connected {
        if let Some(t) = ctx.transport.lock().await.as_ref() {
            match t.transmit(&frame) {
                Ok(()) => {
                    ctx.stats.record_sent();
                    return SendStatus::Sent;
                }
                Err(e) => debug!("transmit failed, queueing: {e}"),
            }
        }
    }

    if queue.push(frame).is_some() {
        ctx.stats.record_dropped();
        debug!("outbound queue full, dropped oldest message");
    }
    ctx.stats.record_queued();
    SendStatus::Queued
}

pub(crate) async fn send_inner(ctx: &Ctx, frame: Frame, priority: bool) -> SendStatus {
    if !priority
        && ctx.config.batching
        && *ctx.state.read().await == ConnectionState::Connected
    {
        if ctx.batcher.absorb(frame).await {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ctx.config.batch_window).await;
                flush_batch(&ctx).await;
            });
        }
        return SendStatus::Batched;
    }

    transmit_or_queue(ctx, frame).await
}

/// Sends the frames buffered during a batch window. One frame goes out
/// plain; several are coalesced into a `batch` envelope. When the
/// connection went away mid-window the frames are parked individually.
pub(crate) async fn flush_batch(ctx: &Ctx) {
    let mut frames = ctx.batcher.drain().await;
    match frames.len() {
        0 => return,
        1 => {
            if let Some(frame) = frames.pop() {
                transmit_or_queue(ctx, frame).await;
            }
            return;
        }
        _ => {}
    }

    let connected = *ctx.state.read().await == ConnectionState::Connected;
    if connected {
        let count = frames.len() as u64;
        let batch = Frame::batch(frames);
        let sent = {
            let slot = ctx.transport.lock().await;
            match slot.as_ref() {
                Some(t) => t.transmit(&batch).is_ok(),
                None => false,
            }
        };
        if sent {
            ctx.stats.record_batch(count);
            return;
        }
        frames = batch.messages.unwrap_or_default();
    }

    let mut queue = ctx.queue.lock().await;
    for frame in frames {
        if queue.push(frame).is_some() {
            ctx.stats.record_dropped();
        }
        ctx.stats.record_queued();
    }
}

#[cfg(test)]
pub(crate) fn test_ctx_with(
    config: ManagerConfig,
) -> (Ctx, mpsc::Receiver<ConnectionEvent>) {
    let (events_tx, events_rx) = mpsc::channel(256);
    let queue = OutboundQueue::new(config.queue_capacity);
    let ctx = Ctx {
        config: Arc::new(config),
        state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
        transport: Arc::new(Mutex::new(None)),
        connect_gate: Arc::new(Mutex::new(())),
        queue: Arc::new(Mutex::new(queue)),
        pending: Arc::new(PendingTable::default()),
        batcher: Arc::new(Batcher::new()),
        stats: Arc::new(ConnectionStats::default()),
        events_tx,
        reconnect_cancel: Arc::new(std::sync::Mutex::new(None)),
        manual_disconnect: Arc::new(AtomicBool::new(false)),
        attempts: Arc::new(AtomicU32::new(0)),
        last_pong: Arc::new(std::sync::Mutex::new(None)),
    };
    (ctx, events_rx)
}

/// Context wired to an unroutable endpoint with retries disabled, so
/// background tasks stay quiet in unit tests.
#[cfg(test)]
pub(crate) fn test_ctx() -> (Ctx, mpsc::Receiver<ConnectionEvent>) {
    let mut config = ManagerConfig::new("ws://127.0.0.1:9/ws");
    config.reconnect.max_attempts = 0;
    test_ctx_with(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_protocol::constants::FrameKind;

    fn quiet_manager() -> ConnectionManager {
        let mut config = ManagerConfig::new("ws://127.0.0.1:9/ws");
        config.reconnect.max_attempts = 0;
        ConnectionManager::new(config)
    }

    #[tokio::test]
    async fn new_manager_starts_disconnected() {
        let mgr = quiet_manager();
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        assert!(!mgr.is_connected().await);
        assert_eq!(mgr.queued_len().await, 0);
        assert_eq!(mgr.stats(), StatsSnapshot::default());
        assert!(mgr.last_pong().is_none());
    }

    #[tokio::test]
    async fn take_events_once() {
        let mgr = quiet_manager();
        assert!(mgr.take_events().await.is_some());
        assert!(mgr.take_events().await.is_none());
    }

    #[tokio::test]
    async fn send_while_disconnected_queues() {
        let mgr = quiet_manager();
        let status = mgr.send(Frame::app("calculation_request")).await;
        assert_eq!(status, SendStatus::Queued);
        assert_eq!(mgr.queued_len().await, 1);
        assert_eq!(mgr.stats().messages_queued, 1);
        assert_eq!(mgr.stats().messages_sent, 0);
    }

    #[tokio::test]
    async fn queue_overflow_drops_oldest_and_counts() {
        let mut config = ManagerConfig::new("ws://127.0.0.1:9/ws");
        config.reconnect.max_attempts = 0;
        config.queue_capacity = 3;
        let mgr = ConnectionManager::new(config);

        for name in ["a", "b", "c", "d"] {
            assert_eq!(mgr.send(Frame::app(name)).await, SendStatus::Queued);
        }
        assert_eq!(mgr.queued_len().await, 3);
        assert_eq!(mgr.stats().messages_dropped, 1);
        assert_eq!(mgr.stats().messages_queued, 4);
    }

    #[tokio::test]
    async fn batching_off_while_disconnected_even_when_enabled() {
        let mut config = ManagerConfig::new("ws://127.0.0.1:9/ws");
        config.reconnect.max_attempts = 0;
        config.batching = true;
        let mgr = ConnectionManager::new(config);

        // Not connected: frames go to the queue, not the batch window.
        assert_eq!(mgr.send(Frame::app("a")).await, SendStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_ack_times_out_without_reply() {
        let mgr = quiet_manager();
        let result = mgr
            .send_with_ack(Frame::app("calculation_request"), Duration::from_secs(3))
            .await;
        assert!(matches!(result, Err(ConnectionError::Timeout)));
        // The pending entry is cleaned up after the timeout.
        assert_eq!(mgr.ctx.pending.len().await, 0);
        // The frame itself was parked for the next connect.
        assert_eq!(mgr.queued_len().await, 1);
    }

    #[tokio::test]
    async fn health_check_requires_connection() {
        let mgr = quiet_manager();
        let result = mgr.health_check(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn measure_latency_requires_connection() {
        let mgr = quiet_manager();
        let result = mgr.measure_latency(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_when_not_connected_is_noop() {
        let mgr = quiet_manager();
        mgr.disconnect().await;
        mgr.disconnect().await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_cancels_scheduled_reconnect() {
        let mgr = quiet_manager();
        let token = CancellationToken::new();
        *mgr.ctx.reconnect_cancel.lock().unwrap() = Some(token.clone());

        mgr.disconnect().await;

        assert!(token.is_cancelled());
        assert!(mgr.ctx.reconnect_cancel.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_requests() {
        let mgr = quiet_manager();
        let rx = mgr.ctx.pending.register("req-1".into()).await;
        mgr.disconnect().await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn sent_frame_carries_generated_message_id() {
        // send_with_ack stamps a messageId before the frame is queued.
        let mgr = quiet_manager();
        let send = mgr.send_with_ack(Frame::app("x"), Duration::from_millis(10));
        let _ = send.await;

        let mut queue = mgr.ctx.queue.lock().await;
        let frame = queue.drain().next().unwrap();
        assert_eq!(frame.kind, FrameKind::Other("x".into()));
        assert!(frame.message_id.is_some());
    }
}
