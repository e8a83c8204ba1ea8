//! Deferred destruction of GPU resources.
//!
//! Resources still referenced by in-flight frames are queued with the frame
//! number that retired them and released once that many frames have passed.

use std::collections::VecDeque;
use vireo_core::constants::DEFAULT_FRAMES_IN_FLIGHT;

/// Queue of resources waiting for the GPU to finish with them.
#[derive(Debug)]
pub struct DeferredDeletionQueue<T> {
    pending: VecDeque<(u64, T)>,
    frames_in_flight: u64,
}

impl<T> Default for DeferredDeletionQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMES_IN_FLIGHT)
    }
}

impl<T> DeferredDeletionQueue<T> {
    /// Create a queue that releases items `frames_in_flight` frames late.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight: frames_in_flight.max(1) as u64,
        }
    }

    /// Change the release delay.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight.max(1) as u64;
    }

    /// Retire `item` during `frame`.
    pub fn queue(&mut self, item: T, frame: u64) {
        self.pending.push_back((frame, item));
    }

    /// Release every item whose retiring frame is old enough.
    ///
    /// Returns the number of items released.
    pub fn process(&mut self, current_frame: u64, mut release: impl FnMut(T)) -> usize {
        let mut released = 0;
        while let Some((frame, _)) = self.pending.front() {
            if current_frame < frame + self.frames_in_flight {
                break;
            }
            if let Some((_, item)) = self.pending.pop_front() {
                release(item);
                released += 1;
            }
        }
        released
    }

    /// Release everything regardless of age. Only valid once the device is idle.
    pub fn flush(&mut self, mut release: impl FnMut(T)) {
        for (_, item) in self.pending.drain(..) {
            release(item);
        }
    }

    /// Number of items still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_after_frames_in_flight() {
        let mut queue = DeferredDeletionQueue::new(2);
        queue.queue("a", 5);
        queue.queue("b", 6);

        let mut released = Vec::new();
        assert_eq!(queue.process(6, |item| released.push(item)), 0);
        assert_eq!(queue.process(7, |item| released.push(item)), 1);
        assert_eq!(released, ["a"]);
        assert_eq!(queue.pending_count(), 1);

        queue.process(8, |item| released.push(item));
        assert_eq!(released, ["a", "b"]);
    }

    #[test]
    fn flush_releases_everything() {
        let mut queue = DeferredDeletionQueue::new(3);
        queue.queue(1, 0);
        queue.queue(2, 100);

        let mut sum = 0;
        queue.flush(|item| sum += item);
        assert_eq!(sum, 3);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn shorter_delay_applies_to_queued_items() {
        let mut queue = DeferredDeletionQueue::new(3);
        queue.queue("a", 10);
        assert_eq!(queue.process(12, drop), 0);
        queue.set_frames_in_flight(2);
        assert_eq!(queue.process(12, drop), 1);
    }

    #[test]
    fn zero_delay_is_clamped() {
        let mut queue = DeferredDeletionQueue::new(0);
        queue.queue((), 4);
        assert_eq!(queue.process(4, drop), 0);
        assert_eq!(queue.process(5, drop), 1);
    }
}
