use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Instant;

use super::{EventTask, Priority};

/// A task waiting for its wake time
struct Deferred {
    wake_at: Instant,
    seq: u64,
    task: EventTask,
}

impl PartialEq for Deferred {
    fn eq(&self, other: &Self) -> bool {
        self.wake_at == other.wake_at && self.seq == other.seq
    }
}

impl Eq for Deferred {}

impl PartialOrd for Deferred {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deferred {
    // Reversed so the heap pops the earliest wake time first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_at
            .cmp(&self.wake_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Ready tasks in one FIFO per priority, plus sleepers ordered by wake time
#[derive(Default)]
pub(crate) struct TaskQueues {
    immediate: [VecDeque<EventTask>; Priority::COUNT],
    deferred: BinaryHeap<Deferred>,
    next_seq: u64,
}

impl TaskQueues {
    pub fn push_immediate(&mut self, task: EventTask) {
        self.immediate[task.priority.lane()].push_back(task);
    }

    pub fn push_deferred(&mut self, task: EventTask, wake_at: Instant) {
        self.next_seq += 1;
        self.deferred.push(Deferred {
            wake_at,
            seq: self.next_seq,
            task,
        });
    }

    /// A due sleeper first, otherwise the oldest ready task of the highest priority
    pub fn pop_ready(&mut self, now: Instant) -> Option<EventTask> {
        if self.deferred.peek().is_some_and(|d| d.wake_at <= now) {
            return self.deferred.pop().map(|d| d.task);
        }
        self.immediate.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn next_wake(&self) -> Option<Instant> {
        self.deferred.peek().map(|d| d.wake_at)
    }

    pub fn immediate_len(&self) -> usize {
        self.immediate.iter().map(VecDeque::len).sum()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    #[cfg(test)]
    pub fn has_ready(&self, now: Instant) -> bool {
        self.immediate_len() > 0 || self.next_wake().is_some_and(|w| w <= now)
    }

    pub fn is_empty(&self) -> bool {
        self.immediate_len() == 0 && self.deferred.is_empty()
    }

    /// Drop everything, handing back the tasks
    pub fn drain(&mut self) -> Vec<EventTask> {
        let mut tasks: Vec<EventTask> = self.immediate.iter_mut().flat_map(|q| q.drain(..)).collect();
        tasks.extend(self.deferred.drain().map(|d| d.task));
        tasks
    }
}
