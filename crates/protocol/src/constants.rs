use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum automatic reconnect attempts before the client gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Delay before the first reconnect attempt.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Cap on the reconnect backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// How often a liveness ping is sent while connected.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the outbound queue used while disconnected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Coalescing window for non-priority sends in batching mode.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Maximum inbound message size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default WebSocket endpoint path on the server.
pub const WS_PATH: &str = "/ws";

/// Frame type identifier.
///
/// Application-defined types round-trip through [`FrameKind::Other`]
/// without losing the original type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "batch")]
    Batch,
    #[serde(untagged)]
    Other(String),
}

/// Derives the WebSocket endpoint URL from an HTTP base URL.
///
/// The scheme follows the base: `https://` becomes `wss://`, `http://`
/// becomes `ws://`. A base that already carries a WebSocket scheme is
/// left untouched. `path` is appended after stripping any trailing
/// slash from the base.
pub fn ws_url(http_base: &str, path: &str) -> String {
    let base = http_base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}{path}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}{path}")
    } else {
        format!("{base}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_serialization() {
        assert_eq!(serde_json::to_string(&FrameKind::Ping).unwrap(), "\"ping\"");
        assert_eq!(serde_json::to_string(&FrameKind::Pong).unwrap(), "\"pong\"");
        assert_eq!(serde_json::to_string(&FrameKind::Ack).unwrap(), "\"ack\"");
        assert_eq!(
            serde_json::to_string(&FrameKind::Batch).unwrap(),
            "\"batch\""
        );
    }

    #[test]
    fn frame_kind_deserialization() {
        let kind: FrameKind = serde_json::from_str("\"ping\"").unwrap();
        assert_eq!(kind, FrameKind::Ping);
    }

    #[test]
    fn application_kind_roundtrip() {
        let kind: FrameKind = serde_json::from_str("\"metrics_update\"").unwrap();
        assert_eq!(kind, FrameKind::Other("metrics_update".into()));
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            "\"metrics_update\""
        );
    }

    #[test]
    fn ws_url_switches_scheme() {
        assert_eq!(
            ws_url("https://dash.example.com", WS_PATH),
            "wss://dash.example.com/ws"
        );
        assert_eq!(
            ws_url("http://localhost:8000", WS_PATH),
            "ws://localhost:8000/ws"
        );
    }

    #[test]
    fn ws_url_strips_trailing_slash() {
        assert_eq!(
            ws_url("http://localhost:8000/", WS_PATH),
            "ws://localhost:8000/ws"
        );
    }

    #[test]
    fn ws_url_keeps_ws_scheme() {
        assert_eq!(
            ws_url("ws://127.0.0.1:9001", WS_PATH),
            "ws://127.0.0.1:9001/ws"
        );
    }
}
