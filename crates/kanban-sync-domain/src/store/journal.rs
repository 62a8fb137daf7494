//! Bookkeeping for optimistic mutations awaiting server confirmation.
//!
//! Each entry keeps a copy of the affected entity as it was before the
//! mutation (or `None` if the mutation created it), so rollback can restore
//! it wholesale instead of undoing individual field changes. An entity the
//! server deletes while a mutation is pending is tombstoned: neither rollback
//! nor confirmation brings it back.

use std::collections::VecDeque;
use uuid::Uuid;

pub type MutationId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Move,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PendingMutation<T> {
    pub id: MutationId,
    pub kind: MutationKind,
    /// Identity of the entity as the store held it when the mutation ran.
    /// For creates this is the temporary local id.
    pub entity_id: i64,
    pub before: Option<T>,
    /// A remote delete removed the entity while this mutation was in flight.
    pub deleted_remotely: bool,
}

impl<T> PendingMutation<T> {
    /// The copy rollback should put back, if any.
    pub fn restorable(self) -> Option<T> {
        if self.deleted_remotely {
            None
        } else {
            self.before
        }
    }
}

#[derive(Debug)]
pub struct MutationJournal<T> {
    /// Oldest first.
    pending: VecDeque<PendingMutation<T>>,
    next_local_id: i64,
}

impl<T> MutationJournal<T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            next_local_id: -1,
        }
    }

    /// Temporary identities are negative so they never collide with server ids.
    pub fn allocate_local_id(&mut self) -> i64 {
        let id = self.next_local_id;
        self.next_local_id -= 1;
        id
    }

    pub fn record(&mut self, kind: MutationKind, entity_id: i64, before: Option<T>) -> MutationId {
        let id = Uuid::new_v4();
        self.pending.push_back(PendingMutation {
            id,
            kind,
            entity_id,
            before,
            deleted_remotely: false,
        });
        id
    }

    /// Tombstones every pending mutation of `entity_id`. Returns how many were marked.
    pub fn mark_deleted(&mut self, entity_id: i64) -> usize {
        let mut marked = 0;
        for pending in self.pending.iter_mut().filter(|m| m.entity_id == entity_id) {
            pending.deleted_remotely = true;
            marked += 1;
        }
        marked
    }

    pub fn take(&mut self, mutation_id: MutationId) -> Option<PendingMutation<T>> {
        let index = self.pending.iter().position(|m| m.id == mutation_id)?;
        self.pending.remove(index)
    }

    pub fn get(&self, mutation_id: MutationId) -> Option<&PendingMutation<T>> {
        self.pending.iter().find(|m| m.id == mutation_id)
    }

    pub fn has_pending(&self, entity_id: i64) -> bool {
        self.pending.iter().any(|m| m.entity_id == entity_id)
    }

    /// Temporary ids of creates that have not been confirmed yet.
    pub fn pending_creates(&self) -> impl Iterator<Item = i64> + '_ {
        self.pending
            .iter()
            .filter(|m| m.kind == MutationKind::Create)
            .map(|m| m.entity_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl<T> Default for MutationJournal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ids_are_negative_and_unique() {
        let mut journal: MutationJournal<()> = MutationJournal::new();
        let a = journal.allocate_local_id();
        let b = journal.allocate_local_id();
        assert!(a < 0 && b < 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_and_take() {
        let mut journal = MutationJournal::new();
        let first = journal.record(MutationKind::Update, 7, Some("before"));
        let second = journal.record(MutationKind::Create, -1, None);

        assert_eq!(journal.len(), 2);
        assert!(journal.has_pending(7));
        assert_eq!(journal.pending_creates().collect::<Vec<_>>(), vec![-1]);

        let taken = journal.take(first).unwrap();
        assert_eq!(taken.before, Some("before"));
        assert!(journal.take(first).is_none());
        assert!(!journal.has_pending(7));
        assert!(journal.get(second).is_some());
    }

    #[test]
    fn test_tombstoned_mutation_restores_nothing() {
        let mut journal = MutationJournal::new();
        let update = journal.record(MutationKind::Update, 7, Some("before"));
        let other = journal.record(MutationKind::Update, 8, Some("other"));

        assert_eq!(journal.mark_deleted(7), 1);
        assert_eq!(journal.mark_deleted(404), 0);

        assert_eq!(journal.take(update).unwrap().restorable(), None);
        assert_eq!(journal.take(other).unwrap().restorable(), Some("other"));
    }

    #[test]
    fn test_clear() {
        let mut journal = MutationJournal::new();
        journal.record(MutationKind::Delete, 1, Some(1));
        journal.clear();
        assert!(journal.is_empty());
    }
}
