//! Pending request table for correlation-id matched replies.

use std::collections::HashMap;

use tokio::sync::{Mutex, oneshot};

use livelink_protocol::Frame;

/// Maps correlation ids to single-shot continuations.
///
/// Each entry resolves exactly once: a matching reply, the caller's
/// timeout, or [`cancel_all`](Self::cancel_all) on connection loss.
#[derive(Default)]
pub(crate) struct PendingTable {
    inner: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
}

impl PendingTable {
    /// Registers a continuation for the given correlation id.
    pub(crate) async fn register(&self, id: String) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, tx);
        rx
    }

    /// Routes a frame to its waiting caller. Gives the frame back when
    /// no entry matches its correlation id.
    pub(crate) async fn try_resolve(&self, frame: Frame) -> Result<(), Frame> {
        let Some(id) = frame.correlation_id() else {
            return Err(frame);
        };
        let id = id.to_string();
        let mut map = self.inner.lock().await;
        match map.remove(&id) {
            Some(tx) => {
                let _ = tx.send(frame);
                Ok(())
            }
            None => Err(frame),
        }
    }

    /// Removes an entry without resolving it. Used by callers cleaning
    /// up after their timeout fired.
    pub(crate) async fn discard(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }

    /// Drops every waiting continuation; callers observe a closed
    /// channel.
    pub(crate) async fn cancel_all(&self) {
        self.inner.lock().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
