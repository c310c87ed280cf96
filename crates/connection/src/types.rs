//! Public types for the connection manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use livelink_protocol::Frame;
use livelink_protocol::constants::{
    DEFAULT_BASE_BACKOFF, DEFAULT_BATCH_WINDOW, DEFAULT_MAX_BACKOFF,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_PING_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};

/// Connection state for the managed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live transport.
    Disconnected,
    /// WebSocket handshake in progress.
    Connecting,
    /// Transport open, frames flowing.
    Connected,
    /// Graceful close in progress.
    Closing,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connectivity changed.
    StateChanged { connected: bool },
    /// An application frame arrived. Internally handled ping/pong and
    /// correlated replies are not forwarded here.
    MessageReceived(Frame),
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The attempt cap was reached; no further automatic reconnects.
    RetriesExhausted { attempts: u32 },
    /// A transport-level failure occurred.
    TransportError(String),
}

/// Outcome of a send. Sending never fails while disconnected; the frame
/// is parked in the bounded queue instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the live connection.
    Sent,
    /// Absorbed into the current batch window.
    Batched,
    /// Parked until the next successful connect.
    Queued,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempt cap; reaching it stops automatic reconnection.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_BASE_BACKOFF,
            max_delay: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based):
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = (self.base_delay.as_millis() as u64).saturating_mul(1 << exp);
        Duration::from_millis(ms.min(self.max_delay.as_millis() as u64))
    }
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager)
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// WebSocket endpoint URL (`ws://` or `wss://`). See
    /// [`ws_url`](livelink_protocol::ws_url) for deriving it from an
    /// HTTP base.
    pub url: String,
    pub reconnect: ReconnectConfig,
    /// Liveness ping period while connected.
    pub ping_interval: Duration,
    /// Outbound queue capacity while disconnected.
    pub queue_capacity: usize,
    /// Coalesce non-priority sends issued within `batch_window` into
    /// one `batch` envelope.
    pub batching: bool,
    pub batch_window: Duration,
}

impl ManagerConfig {
    /// Creates a configuration with the documented defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batching: false,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Closing.is_connected());
        assert_ne!(ConnectionState::Connected, ConnectionState::Connecting);
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn backoff_delays_double_up_to_cap() {
        let config = ReconnectConfig::default();
        let expected_ms = [1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000];
        for (i, &ms) in expected_ms.iter().enumerate() {
            let delay = config.delay_for_attempt((i + 1) as u32);
            assert_eq!(
                delay,
                Duration::from_millis(ms),
                "attempt {}",
                i + 1
            );
        }
    }

    #[test]
    fn backoff_stays_capped_for_large_attempts() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(64), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn manager_config_defaults() {
        let config = ManagerConfig::new("ws://localhost:8000/ws");
        assert_eq!(config.url, "ws://localhost:8000/ws");
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.batch_window, Duration::from_millis(100));
        assert!(!config.batching);
    }
}
