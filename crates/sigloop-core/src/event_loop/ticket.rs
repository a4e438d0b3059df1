//! Ticket machine used by `process_signals` to wait on a signal kind.
//!
//! A waiter takes a ticket in the line of the kind it waits for. Whenever a
//! signal of that kind is dequeued, the whole line is released. The waiter
//! polls its ticket once per dispatch iteration; a released ticket is consumed
//! by the first successful check.
//!
//! Only the dispatch thread touches the machine, so there is no locking.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u64);

#[derive(Debug)]
pub struct TicketMachine<L> {
    lines: HashMap<L, HashMap<TicketId, bool>>,
    next: u64,
}

impl<L> Default for TicketMachine<L> {
    fn default() -> Self {
        Self {
            lines: HashMap::new(),
            next: 0,
        }
    }
}

impl<L: Eq + Hash> TicketMachine<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a fresh, unreleased ticket in `line`.
    pub fn take_ticket(&mut self, line: L) -> TicketId {
        let id = TicketId(self.next);
        self.next = self.next.wrapping_add(1);
        self.lines.entry(line).or_default().insert(id, false);
        id
    }

    /// Releases every outstanding ticket in `line`.
    pub fn mark_line_to_go(&mut self, line: &L) {
        if let Some(tickets) = self.lines.get_mut(line) {
            for released in tickets.values_mut() {
                *released = true;
            }
        }
    }

    /// Returns `true` and consumes the ticket if it was released.
    ///
    /// An unreleased ticket stays in the line for the next check.
    pub fn check_ticket(&mut self, line: &L, id: TicketId) -> bool {
        let Some(tickets) = self.lines.get_mut(line) else {
            return false;
        };
        if tickets.get(&id).copied().unwrap_or(false) {
            tickets.remove(&id);
            if tickets.is_empty() {
                self.lines.remove(line);
            }
            true
        } else {
            false
        }
    }

    /// Drops a ticket whose waiter stopped waiting.
    pub fn discard_ticket(&mut self, line: &L, id: TicketId) {
        if let Some(tickets) = self.lines.get_mut(line) {
            tickets.remove(&id);
            if tickets.is_empty() {
                self.lines.remove(line);
            }
        }
    }

    /// Number of tickets still waiting in `line`.
    pub fn outstanding(&self, line: &L) -> usize {
        self.lines.get(line).map_or(0, HashMap::len)
    }
}
