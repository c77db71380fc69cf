//! Priority queue of predicted action completion times.

use std::cmp::Ordering;

use priority_queue::PriorityQueue;

use crate::action::ActionId;

/// What kind of event a heap entry predicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeapEntryKind {
    /// The action finishes its remaining work.
    Normal,
    /// The action pays its startup latency and starts consuming bandwidth.
    Latency,
    /// The wall-clock duration cap of the action elapses.
    MaxDuration,
}

#[derive(Clone, Copy, Debug)]
struct HeapKey {
    time: f64,
    kind: HeapEntryKind,
    action: ActionId,
}

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.action == other.action
    }
}

impl Eq for HeapKey {}

// Inverted so that the earliest entry has the highest priority.
// Ties are broken by the action id for determinism.
impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.action.cmp(&self.action))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of (predicted completion time, action) entries used by lazily
/// updated models.
///
/// The heap is an index over action identity: an action has at most one entry, and
/// a queued key is never mutated in place. Whenever the remaining work, penalty or
/// bound of an action changes, the entry is removed and reinserted with the new key.
#[derive(Default)]
pub struct ActionHeap {
    queue: PriorityQueue<ActionId, HeapKey>,
}

impl ActionHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
        }
    }

    /// Inserts an entry for the action, replacing any existing one.
    pub fn insert(&mut self, action: ActionId, time: f64, kind: HeapEntryKind) {
        self.queue.remove(&action);
        self.queue.push(action, HeapKey { time, kind, action });
    }

    /// Removes the entry of the action, if any.
    pub fn remove(&mut self, action: ActionId) {
        self.queue.remove(&action);
    }

    /// Returns whether the action has a queued entry.
    pub fn contains(&self, action: ActionId) -> bool {
        self.queue.get(&action).is_some()
    }

    /// Returns the kind of the queued entry of the action, if any.
    pub fn kind_of(&self, action: ActionId) -> Option<HeapEntryKind> {
        self.queue.get(&action).map(|(_, key)| key.kind)
    }

    /// Returns the earliest predicted time, if any.
    pub fn top_date(&self) -> Option<f64> {
        self.queue.peek().map(|(_, key)| key.time)
    }

    /// Pops the earliest entry.
    pub fn pop(&mut self) -> Option<(ActionId, f64, HeapEntryKind)> {
        self.queue.pop().map(|(action, key)| (action, key.time, key.kind))
    }

    /// Returns whether the heap is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
