//! Liveness ping pump.
//!
//! While the connection is up, sends a `ping` frame every `period`.
//! The peer answers with a `pong` frame; the read pump records its
//! arrival time.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use livelink_protocol::Frame;

pub(crate) async fn ping_pump(
    period: Duration,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("sending liveness ping");
                let Ok(json) = serde_json::to_string(&Frame::ping()) else {
                    break;
                };
                if write_tx
                    .send(tungstenite::Message::Text(json.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_protocol::constants::FrameKind;

    #[tokio::test]
    async fn ping_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            ping_pump(Duration::from_secs(30), tx, c).await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn ping_pump_sends_ping_frames_each_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        tokio::spawn(async move {
            ping_pump(Duration::from_secs(30), tx, c).await;
        });

        let msg = rx.recv().await.unwrap();
        let tungstenite::Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let frame: Frame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame.kind, FrameKind::Ping);
        assert!(frame.correlation_id().is_none());

        // A second ping follows one period later.
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, tungstenite::Message::Text(_)));

        cancel.cancel();
    }
}
