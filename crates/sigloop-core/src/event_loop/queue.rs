//! Per-level signal queues and the stack of active loop levels.

use std::collections::{HashSet, VecDeque};

use super::signal::{Signal, SourceId};

/// Pending signals of one loop level plus the sources this level owns.
#[derive(Debug, Default)]
pub struct SignalQueue {
    signals: VecDeque<Signal>,
    sources: HashSet<SourceId>,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `signal` behind every queued signal of the same or higher
    /// urgency (lower priority value).
    pub fn enqueue(&mut self, signal: Signal) {
        let priority = signal.priority();
        let idx = self.signals.partition_point(|s| s.priority() <= priority);
        self.signals.insert(idx, signal);
    }

    /// Enqueues only if `source` belongs to this level; hands the signal back
    /// otherwise.
    pub fn enqueue_if_source_belongs(
        &mut self,
        signal: Signal,
        source: SourceId,
    ) -> Result<(), Signal> {
        if self.sources.contains(&source) {
            self.enqueue(signal);
            Ok(())
        } else {
            Err(signal)
        }
    }

    pub fn dequeue(&mut self) -> Option<Signal> {
        self.signals.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn add_source(&mut self, source: SourceId) {
        self.sources.insert(source);
    }
}

/// One queue per nested loop level. The last queue is the active one.
///
/// Never empty: the outermost level lives as long as the stack.
#[derive(Debug)]
pub struct QueueStack {
    levels: Vec<SignalQueue>,
}

impl Default for QueueStack {
    fn default() -> Self {
        Self {
            levels: vec![SignalQueue::new()],
        }
    }
}

impl QueueStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active levels (1 = only the outermost loop).
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Pushes a fresh level and returns the new depth.
    pub fn push_level(&mut self) -> usize {
        self.levels.push(SignalQueue::new());
        self.levels.len()
    }

    /// Pops the active level. The outermost level is never popped.
    pub fn pop_level(&mut self) -> Option<SignalQueue> {
        if self.levels.len() > 1 {
            self.levels.pop()
        } else {
            None
        }
    }

    /// Drops every level above `depth`, discarding their pending signals.
    pub fn truncate(&mut self, depth: usize) -> usize {
        let keep = depth.max(1);
        let dropped = self.levels.len().saturating_sub(keep);
        self.levels.truncate(keep);
        dropped
    }

    pub fn active(&self) -> &SignalQueue {
        self.levels
            .last()
            .unwrap_or_else(|| unreachable!("queue stack is never empty"))
    }

    pub fn active_mut(&mut self) -> &mut SignalQueue {
        self.levels
            .last_mut()
            .unwrap_or_else(|| unreachable!("queue stack is never empty"))
    }

    /// Routes `signal` to the innermost level owning its source, falling back
    /// to the active level. Returns the index of the receiving level.
    pub fn route(&mut self, signal: Signal) -> usize {
        let mut signal = signal;
        if let Some(source) = signal.source() {
            for (idx, level) in self.levels.iter_mut().enumerate().rev() {
                match level.enqueue_if_source_belongs(signal, source) {
                    Ok(()) => return idx,
                    Err(rejected) => signal = rejected,
                }
            }
        }
        let idx = self.levels.len() - 1;
        self.active_mut().enqueue(signal);
        idx
    }

    /// Pending signal count per level, outermost first.
    pub fn pending(&self) -> Vec<usize> {
        self.levels.iter().map(SignalQueue::len).collect()
    }
}
