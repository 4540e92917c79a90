use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::Pose;
use crate::{PosefeedError, Result};

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Pose>,
    /// Number of publishes so far.
    seq: u64,
    /// `seq` of the last pose handed out by a wait call.
    delivered: u64,
    closed: bool,
}

/// Latest-value handoff between the source thread and the pose sink.
///
/// Publishing overwrites; no history is kept. Pose and sequence number live
/// under one lock, so a reader never sees a pose mixed from two publishes.
#[derive(Debug, Clone, Default)]
pub struct PoseStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    slot: Mutex<Slot>,
    published: Condvar,
}

impl PoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the latest pose and wake any blocked reader.
    pub fn publish(&self, pose: Pose) {
        let mut slot = self.lock();
        slot.latest = Some(pose);
        slot.seq += 1;
        drop(slot);
        self.inner.published.notify_all();
    }

    /// Peek at the latest pose without blocking.
    pub fn try_read(&self) -> Option<Pose> {
        self.lock().latest
    }

    /// Block until a pose not yet returned by a previous wait is available.
    ///
    /// Returns immediately if one was published since the last wait.
    /// Fails with `StreamStopped` once the store is closed and nothing new
    /// is pending.
    pub fn wait_for_next(&self) -> Result<Pose> {
        let mut slot = self.lock();
        loop {
            if let Some(pose) = Self::take_pending(&mut slot) {
                return Ok(pose);
            }
            if slot.closed {
                return Err(PosefeedError::StreamStopped);
            }
            slot = self
                .inner
                .published
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`wait_for_next`](Self::wait_for_next), giving up after `timeout`.
    pub fn wait_for_next_timeout(&self, timeout: Duration) -> Result<Pose> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(pose) = Self::take_pending(&mut slot) {
                return Ok(pose);
            }
            if slot.closed {
                return Err(PosefeedError::StreamStopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PosefeedError::Timeout);
            }
            slot = self
                .inner
                .published
                .wait_timeout(slot, remaining)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Number of poses published so far. Unchanged between two polls means
    /// the sink is looking at the same pose again.
    pub fn sequence(&self) -> u64 {
        self.lock().seq
    }

    /// Mark the end of the stream and wake blocked readers.
    ///
    /// The last pose stays readable through `try_read`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.published.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take_pending(slot: &mut Slot) -> Option<Pose> {
        if slot.seq > slot.delivered {
            slot.delivered = slot.seq;
            slot.latest
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
