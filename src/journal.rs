//! Undo journal backing the all-or-nothing semantics of exchange calls.
//!
//! Every state write records the value it overwrote. Reverting to a
//! checkpoint replays the entries recorded after it in reverse order.
//! Checkpoints nest, which keeps re-entrant calls atomic on their own.

use crate::arena::OrderStatus;
use crate::command::{Address, Amount, OrderId, TokenId};

/// A single undoable write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JournalEntry {
    /// A custody balance was overwritten
    Balance {
        token: TokenId,
        owner: Address,
        previous: Amount,
    },
    /// An order was appended to the order table
    OrderInserted { id: OrderId },
    /// An order left the open state
    StatusChanged { id: OrderId, previous: OrderStatus },
    /// A notification was appended to the event log at `index`
    EventLogged { index: usize },
}

/// Position in the journal to revert to.
pub type JournalCheckpoint = usize;

#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn checkpoint(&self) -> JournalCheckpoint {
        self.entries.len()
    }

    #[inline]
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Remove and return every entry recorded after `checkpoint`,
    /// most recent first.
    pub fn unwind(&mut self, checkpoint: JournalCheckpoint) -> impl Iterator<Item = JournalEntry> {
        let tail = if checkpoint < self.entries.len() {
            self.entries.split_off(checkpoint)
        } else {
            Vec::new()
        };
        tail.into_iter().rev()
    }

    /// Forget all entries; called when the outermost call commits.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwind_is_lifo_and_truncates() {
        let mut journal = Journal::new();
        journal.record(JournalEntry::OrderInserted { id: 1 });
        let cp = journal.checkpoint();
        journal.record(JournalEntry::OrderInserted { id: 2 });
        journal.record(JournalEntry::EventLogged { index: 0 });

        let undone: Vec<_> = journal.unwind(cp).collect();
        assert_eq!(
            undone,
            vec![
                JournalEntry::EventLogged { index: 0 },
                JournalEntry::OrderInserted { id: 2 },
            ]
        );
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn test_unwind_past_end_is_noop() {
        let mut journal = Journal::new();
        journal.record(JournalEntry::OrderInserted { id: 1 });
        assert_eq!(journal.unwind(5).count(), 0);
        assert_eq!(journal.len(), 1);

        journal.clear();
        assert!(journal.is_empty());
    }
}
