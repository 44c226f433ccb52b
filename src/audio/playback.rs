//! # Playback Queue
//!
//! Unbounded FIFO between speech synthesis (producer) and the outbound transport (consumer).
//! Synthesis never waits on the network: frames are pushed as soon as they are produced and
//! the transport pump pops them at its own pace.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

use super::frame::AudioFrame;

/// Per-session queue of outbound audio frames.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    notify: Notify,
    closed: AtomicBool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. Never blocks. Frames pushed after `close` are dropped.
    pub fn push(&self, frame: AudioFrame) {
        if self.is_closed() {
            return;
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(frame);
        self.notify.notify_one();
    }

    /// Take the oldest frame without waiting.
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Take the oldest frame, waiting for one if the queue is empty.
    ///
    /// Returns `None` once the queue has been closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting frames and wake any waiting reader.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(tag: u8) -> AudioFrame {
        AudioFrame::mono(vec![tag; 4], 48000)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = PlaybackQueue::new();
        for tag in 1..=3 {
            queue.push(frame(tag));
        }
        assert_eq!(queue.len(), 3);
        for tag in 1..=3 {
            assert_eq!(queue.pop().await.unwrap().bytes()[0], tag);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(PlaybackQueue::new());
        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        queue.push(frame(7));
        let popped = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader woke")
            .unwrap();
        assert_eq!(popped.unwrap().bytes()[0], 7);
    }

    #[tokio::test]
    async fn test_close_wakes_reader_after_drain() {
        let queue = Arc::new(PlaybackQueue::new());
        queue.push(frame(1));

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(f) = queue.pop().await {
                    seen.push(f.bytes()[0]);
                }
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let seen = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader finished")
            .unwrap();
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_push_after_close_is_dropped() {
        let queue = PlaybackQueue::new();
        queue.close();
        queue.push(frame(1));
        assert!(queue.is_empty());
        assert!(queue.pop().await.is_none());
    }
}
