//! Coalescing of non-priority sends.
//!
//! In batching mode, non-priority frames sent while connected are
//! buffered for a short window and transmitted as one `batch` envelope.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use livelink_protocol::Frame;

pub(crate) struct Batcher {
    buf: Mutex<Vec<Frame>>,
    armed: AtomicBool,
}

impl Batcher {
    pub(crate) fn new() -> Self {
        Self {
            buf: Mutex::new(Vec::new()),
            armed: AtomicBool::new(false),
        }
    }

    /// Buffers a frame. Returns `true` when this frame opened a new
    /// window and the caller must arm the flush timer.
    pub(crate) async fn absorb(&self, frame: Frame) -> bool {
        self.buf.lock().await.push(frame);
        !self.armed.swap(true, Ordering::AcqRel)
    }

    /// Empties the buffer and disarms the window.
    pub(crate) async fn drain(&self) -> Vec<Frame> {
        let mut buf = self.buf.lock().await;
        self.armed.store(false, Ordering::Release);
        std::mem::take(&mut *buf)
    }
}
