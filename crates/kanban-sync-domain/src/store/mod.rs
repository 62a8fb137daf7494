//! Entity stores.
//!
//! One store per entity type. Optimistic local mutations and remote events go
//! through the same store methods, so both paths share one set of merge rules.
//! No store method awaits: network work happens before or after a mutation.

pub mod board_store;
pub mod card_store;
pub mod column_store;
pub mod journal;
pub mod ordered;
pub mod sprint_store;

pub use board_store::{BoardMutation, BoardStore};
pub use card_store::{CardMutation, CardStore};
pub use column_store::{ColumnMutation, ColumnStore};
pub use journal::{MutationId, MutationJournal, MutationKind, PendingMutation};
pub use ordered::{OrderedLists, ScopedEntity, Upserted};
pub use sprint_store::{SprintMutation, SprintStore};

use kanban_sync_core::SyncResult;

/// What applying a remote event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Removed,
    Moved,
    Archived,
    /// Nothing to do: unknown identity or a redundant delete.
    Ignored,
}

impl From<Upserted> for Applied {
    fn from(value: Upserted) -> Self {
        match value {
            Upserted::Inserted => Applied::Inserted,
            Upserted::Replaced => Applied::Replaced,
        }
    }
}

pub trait EntityStore {
    type Entity;
    type Scope;
    type Mutation;
    type Event;

    /// Full refresh of one scope from an authoritative list.
    fn load(&mut self, scope: Self::Scope, items: Vec<Self::Entity>);

    /// Applies a local change immediately and journals how to undo it.
    fn apply_optimistic(&mut self, mutation: Self::Mutation) -> SyncResult<MutationId>;

    /// Settles a mutation with the server's answer. `None` confirms a deletion.
    fn confirm(&mut self, mutation_id: MutationId, server: Option<Self::Entity>);

    /// Restores the pre-mutation snapshot. Returns false for unknown or settled ids.
    fn rollback(&mut self, mutation_id: MutationId) -> bool;

    fn apply_remote_event(&mut self, event: Self::Event) -> Applied;

    /// Current local copy of the entity a pending mutation touched.
    fn pending_entity(&self, mutation_id: MutationId) -> Option<Self::Entity>;

    /// Identity a pending mutation touched (temporary id for creates).
    fn pending_target(&self, mutation_id: MutationId) -> Option<i64>;
}
