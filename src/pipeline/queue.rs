use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::frame::CameraFrame;

/// What happens when a frame arrives and the queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Discard the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Discard the incoming frame.
    DropNewest,
    /// Wait for room (stalls the camera thread).
    Block,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(BackpressurePolicy::DropOldest),
            "drop_newest" => Ok(BackpressurePolicy::DropNewest),
            "block" => Ok(BackpressurePolicy::Block),
            other => Err(anyhow!(
                "unknown backpressure policy '{}' (expected drop_oldest, drop_newest or block)",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest pending frame.
    ReplacedOldest,
    /// The incoming frame was discarded.
    Dropped,
    /// The queue is closed; the frame was discarded.
    Closed,
}

struct QueueState {
    frames: VecDeque<CameraFrame>,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO between the camera thread and the inference worker.
pub struct FrameQueue {
    capacity: usize,
    policy: BackpressurePolicy,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame queue capacity must be at least 1"));
        }
        Ok(Self {
            capacity,
            policy,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                dropped: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn push(&self, frame: CameraFrame) -> Result<PushOutcome> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("frame queue lock poisoned"))?;
        if state.closed {
            state.dropped += 1;
            return Ok(PushOutcome::Closed);
        }

        let mut outcome = PushOutcome::Queued;
        if state.frames.len() >= self.capacity {
            match self.policy {
                BackpressurePolicy::DropOldest => {
                    state.frames.pop_front();
                    state.dropped += 1;
                    outcome = PushOutcome::ReplacedOldest;
                }
                BackpressurePolicy::DropNewest => {
                    state.dropped += 1;
                    return Ok(PushOutcome::Dropped);
                }
                BackpressurePolicy::Block => {
                    state = self
                        .not_full
                        .wait_while(state, |s| !s.closed && s.frames.len() >= self.capacity)
                        .map_err(|_| anyhow!("frame queue lock poisoned"))?;
                    if state.closed {
                        state.dropped += 1;
                        return Ok(PushOutcome::Closed);
                    }
                }
            }
        }

        state.frames.push_back(frame);
        self.not_empty.notify_one();
        Ok(outcome)
    }

    /// Next frame in arrival order; `None` once the queue is closed.
    pub fn pop(&self) -> Option<CameraFrame> {
        let state = self.state.lock().ok()?;
        let mut state = self
            .not_empty
            .wait_while(state, |s| !s.closed && s.frames.is_empty())
            .ok()?;
        if state.closed {
            return None;
        }
        let frame = state.frames.pop_front();
        self.not_full.notify_one();
        frame
    }

    /// Reject further pushes, discard pending frames and wake all waiters.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            if !state.closed {
                state.closed = true;
                let pending = state.frames.len() as u64;
                state.frames.clear();
                state.dropped += pending;
            }
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded by backpressure, rejected after close, or discarded by close.
    pub fn dropped(&self) -> u64 {
        self.state.lock().map(|s| s.dropped).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(sequence: u64) -> CameraFrame {
        CameraFrame::from_rgb(vec![0u8; 3], 1, 1, sequence).unwrap()
    }

    #[test]
    fn preserves_arrival_order() -> Result<()> {
        let queue = FrameQueue::new(4, BackpressurePolicy::DropOldest)?;
        for sequence in 1..=3 {
            assert_eq!(queue.push(frame(sequence))?, PushOutcome::Queued);
        }
        let order: Vec<u64> = (0..3).filter_map(|_| queue.pop()).map(|f| f.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn drop_oldest_keeps_latest() -> Result<()> {
        let queue = FrameQueue::new(2, BackpressurePolicy::DropOldest)?;
        queue.push(frame(1))?;
        queue.push(frame(2))?;
        assert_eq!(queue.push(frame(3))?, PushOutcome::ReplacedOldest);
        assert_eq!(queue.pop().map(|f| f.sequence), Some(2));
        assert_eq!(queue.pop().map(|f| f.sequence), Some(3));
        assert_eq!(queue.dropped(), 1);
        Ok(())
    }

    #[test]
    fn drop_newest_rejects_incoming() -> Result<()> {
        let queue = FrameQueue::new(1, BackpressurePolicy::DropNewest)?;
        queue.push(frame(1))?;
        assert_eq!(queue.push(frame(2))?, PushOutcome::Dropped);
        assert_eq!(queue.pop().map(|f| f.sequence), Some(1));
        assert_eq!(queue.dropped(), 1);
        Ok(())
    }

    #[test]
    fn block_waits_for_room() -> Result<()> {
        let queue = Arc::new(FrameQueue::new(1, BackpressurePolicy::Block)?);
        queue.push(frame(1))?;
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(frame(2)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|f| f.sequence), Some(1));
        let outcome = producer.join().map_err(|_| anyhow!("producer panicked"))??;
        assert_eq!(outcome, PushOutcome::Queued);
        assert_eq!(queue.pop().map(|f| f.sequence), Some(2));
        Ok(())
    }

    #[test]
    fn close_discards_and_wakes() -> Result<()> {
        let queue = Arc::new(FrameQueue::new(2, BackpressurePolicy::DropOldest)?);
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop().map(|f| f.sequence))
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().map_err(|_| anyhow!("consumer panicked"))?, None);

        let queue = FrameQueue::new(2, BackpressurePolicy::DropOldest)?;
        queue.push(frame(1))?;
        queue.close();
        assert!(queue.pop().is_none());
        assert_eq!(queue.push(frame(2))?, PushOutcome::Closed);
        assert_eq!(queue.dropped(), 2);
        assert!(queue.is_closed());
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(FrameQueue::new(0, BackpressurePolicy::Block).is_err());
        assert!("drop-newest".parse::<BackpressurePolicy>().is_ok());
    }
}
