//! Reconnection scheduling with exponential backoff.
//!
//! A single reconnect loop exists at a time; scheduling a new one
//! replaces (and cancels) any prior one. Explicit `connect()` and
//! `disconnect()` calls also cancel it.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::{Ctx, establish};
use crate::types::{ConnectionEvent, ConnectionState};

/// Cancels any scheduled reconnect.
pub(crate) fn cancel_reconnect(slot: &std::sync::Mutex<Option<CancellationToken>>) {
    if let Ok(mut guard) = slot.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Called by the read pump when the connection is gone. Transitions to
/// `Disconnected`, cancels in-flight requests, and starts the reconnect
/// loop unless the closure was user-initiated.
pub(crate) async fn handle_transport_loss(ctx: &Ctx) {
    {
        let mut state = ctx.state.write().await;
        if *state == ConnectionState::Disconnected {
            return; // Already handled by a graceful disconnect.
        }
        *state = ConnectionState::Disconnected;
    }

    ctx.pending.cancel_all().await;
    let _ = ctx
        .events_tx
        .try_send(ConnectionEvent::StateChanged { connected: false });

    if ctx.manual_disconnect.load(Ordering::Relaxed) {
        debug!("connection closed by user, not reconnecting");
        return;
    }

    info!("connection lost");
    spawn_reconnect(ctx.clone());
}

/// Replaces any scheduled reconnect with a fresh loop.
pub(crate) fn spawn_reconnect(ctx: Ctx) {
    let cancel = CancellationToken::new();
    cancel_reconnect(&ctx.reconnect_cancel);
    if let Ok(mut guard) = ctx.reconnect_cancel.lock() {
        *guard = Some(cancel.clone());
    }
    tokio::spawn(reconnect_loop(ctx, cancel));
}

/// Backoff loop: wait, retry, repeat until connected, cancelled, or the
/// attempt cap is reached.
pub(crate) async fn reconnect_loop(ctx: Ctx, cancel: CancellationToken) {
    loop {
        let done = ctx.attempts.load(Ordering::SeqCst);
        if done >= ctx.config.reconnect.max_attempts {
            info!(attempts = done, "reconnect attempts exhausted, giving up");
            let _ = ctx
                .events_tx
                .try_send(ConnectionEvent::RetriesExhausted { attempts: done });
            break;
        }
        let attempt = done + 1;
        ctx.attempts.store(attempt, Ordering::SeqCst);
        ctx.stats.record_reconnect_attempt();

        let delay = ctx.config.reconnect.delay_for_attempt(attempt);
        let _ = ctx
            .events_tx
            .try_send(ConnectionEvent::Reconnecting { attempt, delay });
        info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if cancel.is_cancelled() {
            return;
        }

        match establish(&ctx).await {
            Ok(()) => {
                info!(attempt, "reconnected");
                break;
            }
            Err(e) => {
                warn!(attempt, error = %e, "reconnect attempt failed");
                let _ = ctx
                    .events_tx
                    .try_send(ConnectionEvent::TransportError(e.to_string()));
            }
        }

        if cancel.is_cancelled() {
            return;
        }
    }

    // Release the token slot unless a newer loop replaced this one
    // (replacement cancels our token first).
    if !cancel.is_cancelled()
        && let Ok(mut guard) = ctx.reconnect_cancel.lock()
    {
        guard.take();
    }
}
