//! Ready, sleep and wait queues
//!
//! All queues store [`ThreadId`]s; the thread records themselves live in
//! the scheduler's registry.

use alloc::{
    collections::{BTreeMap, VecDeque},
    vec::Vec,
};

use super::thread::{ThreadId, PRI_MAX};

/// Number of distinct priority levels.
const NUM_PRIORITIES: usize = PRI_MAX as usize + 1;

/// A ready thread together with the order in which it became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    seq: u64,
    tid: ThreadId,
}

/// Ready queue: one FIFO per priority level plus a bitmap of non-empty
/// levels.
///
/// Entries carry a ready-insertion sequence number so that a thread whose
/// priority changes while it is queued keeps its place relative to the
/// threads that became ready before and after it.
pub struct ReadyQueue {
    levels: [VecDeque<ReadyEntry>; NUM_PRIORITIES],
    /// Bit N set when level N is non-empty
    bitmap: u64,
    next_seq: u64,
    len: usize,
}

impl ReadyQueue {
    /// Create new empty ready queue
    pub fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| VecDeque::new()),
            bitmap: 0,
            next_seq: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `tid` at the tail of its priority level.
    pub fn push(&mut self, tid: ThreadId, priority: u8) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.insert(ReadyEntry { seq, tid }, priority);
    }

    fn insert(&mut self, entry: ReadyEntry, priority: u8) {
        let level = priority as usize;
        let queue = &mut self.levels[level];
        let pos = queue.partition_point(|e| e.seq < entry.seq);
        queue.insert(pos, entry);
        self.bitmap |= 1 << level;
        self.len += 1;
    }

    /// Highest priority currently queued.
    pub fn max_priority(&self) -> Option<u8> {
        if self.bitmap == 0 {
            None
        } else {
            Some((63 - self.bitmap.leading_zeros()) as u8)
        }
    }

    /// Remove the earliest-ready thread of the highest priority.
    pub fn pop(&mut self) -> Option<ThreadId> {
        let level = self.max_priority()? as usize;
        let entry = self.levels[level].pop_front()?;
        if self.levels[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
        self.len -= 1;
        Some(entry.tid)
    }

    fn take(&mut self, tid: ThreadId, priority: u8) -> Option<ReadyEntry> {
        let level = priority as usize;
        let pos = self.levels[level].iter().position(|e| e.tid == tid)?;
        let entry = self.levels[level].remove(pos)?;
        if self.levels[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
        self.len -= 1;
        Some(entry)
    }

    /// Move a queued thread from `old` to `new` priority.
    pub fn reposition(&mut self, tid: ThreadId, old: u8, new: u8) {
        if old == new {
            return;
        }
        match self.take(tid, old) {
            Some(entry) => self.insert(entry, new),
            None => panic!("thread {} not queued at priority {}", tid, old),
        }
    }

    /// Queued threads in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.levels.iter().rev().flat_map(|q| q.iter().map(|e| e.tid))
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleeping threads keyed by absolute wake tick.
pub struct SleepQueue {
    sleepers: BTreeMap<u64, VecDeque<ThreadId>>,
    len: usize,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            sleepers: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, tid: ThreadId, wake_tick: u64) {
        self.sleepers.entry(wake_tick).or_default().push_back(tid);
        self.len += 1;
    }

    /// Earliest pending wake tick.
    pub fn next_wake(&self) -> Option<u64> {
        self.sleepers.keys().next().copied()
    }

    /// Remove and return every thread due at or before `now`, earliest
    /// first.
    pub fn pop_due(&mut self, now: u64) -> Vec<ThreadId> {
        let mut due = Vec::new();
        while let Some(entry) = self.sleepers.first_entry() {
            if *entry.key() > now {
                break;
            }
            due.extend(entry.remove());
        }
        self.len -= due.len();
        due
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiters on a synchronization primitive, highest priority first and FIFO
/// among equals.
#[derive(Debug, Default, Clone)]
pub struct WaitList {
    waiters: Vec<ThreadId>,
}

impl WaitList {
    pub const fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.waiters.contains(&tid)
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.waiters.iter().copied()
    }

    /// Insert behind every waiter of equal or higher priority.
    pub fn insert_ordered<F>(&mut self, tid: ThreadId, priority_of: F)
    where
        F: Fn(ThreadId) -> u8,
    {
        let priority = priority_of(tid);
        let pos = self
            .waiters
            .iter()
            .position(|&w| priority_of(w) < priority)
            .unwrap_or(self.waiters.len());
        self.waiters.insert(pos, tid);
    }

    /// Restore ordering after waiter priorities changed. The sort is stable,
    /// so equal-priority waiters keep their arrival order.
    pub fn reorder<F>(&mut self, priority_of: F)
    where
        F: Fn(ThreadId) -> u8,
    {
        self.waiters.sort_by_key(|&w| core::cmp::Reverse(priority_of(w)));
    }

    pub fn pop_front(&mut self) -> Option<ThreadId> {
        if self.waiters.is_empty() {
            None
        } else {
            Some(self.waiters.remove(0))
        }
    }

    /// Priority of the first waiter.
    pub fn max_priority<F>(&self, priority_of: F) -> Option<u8>
    where
        F: Fn(ThreadId) -> u8,
    {
        self.waiters.iter().map(|&w| priority_of(w)).max()
    }
}
