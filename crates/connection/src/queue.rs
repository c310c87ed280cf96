//! Bounded outbound queue used while disconnected.

use std::collections::VecDeque;

use livelink_protocol::Frame;

/// Fixed-capacity FIFO that drops its oldest entry when full.
pub(crate) struct OutboundQueue {
    buf: VecDeque<Frame>,
    capacity: usize,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a frame, returning the dropped oldest entry when the
    /// queue was already at capacity.
    pub(crate) fn push(&mut self, frame: Frame) -> Option<Frame> {
        let dropped = if self.buf.len() == self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(frame);
        dropped
    }

    /// Empties the queue in insertion order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.buf.drain(..)
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_protocol::constants::FrameKind;

    fn kinds(queue: &mut OutboundQueue) -> Vec<String> {
        queue
            .drain()
            .map(|f| match f.kind {
                FrameKind::Other(s) => s,
                other => panic!("unexpected kind {other:?}"),
            })
            .collect()
    }

    #[test]
    fn preserves_insertion_order() {
        let mut queue = OutboundQueue::new(10);
        queue.push(Frame::app("a"));
        queue.push(Frame::app("b"));
        queue.push(Frame::app("c"));
        assert_eq!(queue.len(), 3);
        assert_eq!(kinds(&mut queue), ["a", "b", "c"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn drops_oldest_at_capacity() {
        let mut queue = OutboundQueue::new(3);
        assert!(queue.push(Frame::app("a")).is_none());
        assert!(queue.push(Frame::app("b")).is_none());
        assert!(queue.push(Frame::app("c")).is_none());

        let dropped = queue.push(Frame::app("d")).expect("oldest dropped");
        assert_eq!(dropped.kind, FrameKind::Other("a".into()));
        assert_eq!(kinds(&mut queue), ["b", "c", "d"]);
    }

    #[test]
    fn retains_most_recent_under_sustained_overflow() {
        let mut queue = OutboundQueue::new(2);
        for name in ["a", "b", "c", "d", "e"] {
            queue.push(Frame::app(name));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(kinds(&mut queue), ["d", "e"]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut queue = OutboundQueue::new(0);
        queue.push(Frame::app("a"));
        let dropped = queue.push(Frame::app("b")).expect("oldest dropped");
        assert_eq!(dropped.kind, FrameKind::Other("a".into()));
        assert_eq!(kinds(&mut queue), ["b"]);
    }
}
