// SPDX-FileCopyrightText: 2026 Formvault Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FIFO queue of suspended operations.
//!
//! When an operation needs the master password and a prompt is pending, the
//! operation is parked here as a typed continuation and replayed in arrival
//! order once the prompt resolves. [`SuspendedQueue::take_batch`] removes
//! exactly the operations present at call time; anything an operation
//! enqueues while the batch replays waits for the next drain cycle.

use std::collections::VecDeque;

/// FIFO of typed continuations awaiting a prompt resolution.
#[derive(Debug)]
pub struct SuspendedQueue<T> {
    ops: VecDeque<T>,
}

impl<T> Default for SuspendedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SuspendedQueue<T> {
    pub fn new() -> Self {
        Self {
            ops: VecDeque::new(),
        }
    }

    /// Park an operation at the tail.
    pub fn push(&mut self, op: T) {
        self.ops.push_back(op);
    }

    /// Remove and return every operation currently queued.
    ///
    /// The queue is empty afterwards, so operations re-enqueued during
    /// replay land in a fresh batch instead of being replayed twice.
    pub fn take_batch(&mut self) -> Vec<T> {
        self.ops.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_is_fifo() {
        let mut queue = SuspendedQueue::new();
        queue.push("first");
        queue.push("second");
        queue.push("third");

        assert_eq!(queue.take_batch(), vec!["first", "second", "third"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn operations_queued_during_replay_wait_for_next_batch() {
        let mut queue = SuspendedQueue::new();
        queue.push(1);
        queue.push(2);

        let batch = queue.take_batch();
        assert_eq!(batch.len(), 2);

        // Simulate an operation re-suspending itself mid-replay.
        for op in batch {
            if op == 1 {
                queue.push(10);
            }
        }

        assert_eq!(queue.take_batch(), vec![10]);
    }
}
