//! Bounded queue of interleaved `f32` samples connecting pipeline stages.
//!
//! - session receiver (decode) → queue
//! - resampler thread → queue
//! - output callback / null sink drains queue
//!
//! Shutdown is explicit: [`SampleQueue::close`] wakes every waiter, and
//! [`SampleQueue::clear`] discards whatever is still buffered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Thread-safe bounded queue for interleaved `f32` samples.
///
/// The `closed` flag lives under the same mutex as the samples so producers and consumers
/// never miss a close. Channel count is fixed for the lifetime of the queue.
pub struct SampleQueue {
    channels: usize,
    max_samples: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
}

struct Inner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Strategy for popping interleaved frames from the queue.
#[derive(Clone, Copy, Debug)]
pub enum PopStrategy {
    /// Block until exactly `frames` are available, or return `None` if closed before enough data.
    BlockingExact { frames: usize },
    /// Block until at least one frame is available, then return up to `max_frames`.
    BlockingUpTo { max_frames: usize },
    /// Return immediately with up to `max_frames`, or `None` if currently empty.
    NonBlocking { max_frames: usize },
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SampleQueue {
    pub fn new(channels: usize, max_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            max_samples: max_samples.max(channels),
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, g: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.cv.wait(g).unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(&self, g: MutexGuard<'a, Inner>, dur: Duration) -> MutexGuard<'a, Inner> {
        match self.cv.wait_timeout(g, dur) {
            Ok((g, _)) => g,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.max_samples / self.channels
    }

    /// Buffered frames right now; may change as soon as this returns.
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the producer side finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Drop all buffered samples without closing.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.max_samples && !g.closed {
                g = self.wait(g);
            }
            if g.closed {
                return false;
            }

            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop interleaved frames using the requested strategy.
    ///
    /// Returns `None` when the request cannot be satisfied (closed, or empty for non-blocking).
    pub fn pop(&self, strategy: PopStrategy) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_samples = match strategy {
            PopStrategy::BlockingExact { frames } => {
                let want = frames * self.channels;
                while g.samples.len() < want && !g.closed {
                    g = self.wait(g);
                }
                if g.samples.len() < want {
                    return None;
                }
                want
            }
            PopStrategy::BlockingUpTo { max_frames } => {
                while g.samples.len() < self.channels && !g.closed {
                    g = self.wait(g);
                }
                (g.samples.len() / self.channels).min(max_frames) * self.channels
            }
            PopStrategy::NonBlocking { max_frames } => {
                (g.samples.len() / self.channels).min(max_frames) * self.channels
            }
        };
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.samples.drain(..take_samples).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait up to `timeout` for any buffered audio to appear.
    pub fn wait_for_any(&self, timeout: Duration) -> bool {
        let g = self.lock();
        if !g.samples.is_empty() {
            return true;
        }
        let g = self.wait_timeout(g, timeout);
        !g.samples.is_empty()
    }

    /// Block until the queue is closed and drained, or `cancel` is set.
    ///
    /// Returns `true` if the queue drained normally, `false` if cancelled.
    pub fn wait_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.closed && g.samples.is_empty() {
                return true;
            }
            g = self.wait_timeout(g, Duration::from_millis(50));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn capacity_for_fallbacks() {
        assert_eq!(capacity_for(48_000, 2, 2.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, -1.0), 192_000);
        assert_eq!(capacity_for(48_000, 2, f32::NAN), 192_000);
        assert_eq!(capacity_for(0, 2, 1.0), 2);
    }

    #[test]
    fn pop_nonblocking_empty() {
        let q = SampleQueue::new(2, 16);
        assert!(q.pop(PopStrategy::NonBlocking { max_frames: 4 }).is_none());
    }

    #[test]
    fn pop_nonblocking_returns_whole_frames() {
        let q = SampleQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let out = q.pop(PopStrategy::NonBlocking { max_frames: 2 }).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        let out = q.pop(PopStrategy::NonBlocking { max_frames: 8 }).unwrap();
        assert_eq!(out, vec![5.0, 6.0]);
    }

    #[test]
    fn pop_blocking_exact_waits_for_full_frames() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            let out = q_pop.pop(PopStrategy::BlockingExact { frames: 3 }).unwrap();
            assert_eq!(out.len(), 6);
        });

        q.push_blocking(&[0.1, 0.2, 0.3, 0.4]);
        q.push_blocking(&[0.5, 0.6]);
        handle.join().unwrap();
    }

    #[test]
    fn pop_blocking_up_to_drains_tail_then_reports_close() {
        let q = Arc::new(SampleQueue::new(2, 64));
        let q_pop = q.clone();
        let handle = thread::spawn(move || {
            let out = q_pop.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).unwrap();
            assert_eq!(out.len(), 4);
            assert!(q_pop.pop(PopStrategy::BlockingUpTo { max_frames: 8 }).is_none());
        });

        assert!(q.push_blocking(&[1.0, 2.0, 3.0, 4.0]));
        q.close();
        handle.join().unwrap();
    }

    #[test]
    fn push_blocking_unblocks_on_close() {
        let q = Arc::new(SampleQueue::new(1, 2));
        let q_push = q.clone();
        let handle = thread::spawn(move || q_push.push_blocking(&[1.0, 2.0, 3.0, 4.0]));

        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn clear_discards_buffered_samples() {
        let q = SampleQueue::new(1, 16);
        q.push_blocking(&[1.0, 2.0, 3.0]);
        q.clear();
        assert_eq!(q.len_frames(), 0);
        assert!(!q.is_closed());
    }

    #[test]
    fn wait_for_any_times_out_when_empty() {
        let q = SampleQueue::new(2, 64);
        assert!(!q.wait_for_any(Duration::from_millis(10)));
        q.push_blocking(&[1.0, 2.0]);
        assert!(q.wait_for_any(Duration::from_millis(10)));
    }

    #[test]
    fn wait_drained_or_cancel_returns_true_when_closed() {
        let q = SampleQueue::new(2, 64);
        let cancel = AtomicBool::new(false);
        q.close();
        assert!(q.wait_drained_or_cancel(&cancel));
    }

    #[test]
    fn wait_drained_or_cancel_respects_cancel() {
        let q = SampleQueue::new(2, 64);
        q.push_blocking(&[1.0, 2.0]);
        let cancel = AtomicBool::new(true);
        assert!(!q.wait_drained_or_cancel(&cancel));
    }
}
