//! Deadline queue driven by the external reactor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

use crate::browse::BrowserId;
use crate::entry_group::GroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Timeout {
    /// Probing for a group finished; `generation` guards against a reset
    /// or re-commit in between.
    ProbeComplete { group: GroupId, generation: u64 },
    ResolverDeadline(BrowserId),
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Timeout)>>,
    seq: u64,
}

impl TimerQueue {
    pub(crate) fn schedule(&mut self, at: Instant, timeout: Timeout) {
        self.seq += 1;
        self.heap.push(Reverse((at, self.seq, timeout)));
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Pops the earliest timeout due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<Timeout> {
        match self.heap.peek() {
            Some(Reverse((at, _, _))) if *at <= now => {
                self.heap.pop().map(|Reverse((_, _, timeout))| timeout)
            }
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
