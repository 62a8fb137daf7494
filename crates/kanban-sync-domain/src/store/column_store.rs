use kanban_sync_core::{SyncError, SyncResult};
use tracing::{debug, warn};

use super::journal::{MutationId, MutationJournal, MutationKind};
use super::ordered::OrderedLists;
use super::{Applied, EntityStore};
use crate::board::BoardId;
use crate::column::{Column, ColumnId, ColumnPatch};
use crate::event::ColumnEvent;
use crate::position::{position_for_move, renumber};

#[derive(Debug, Clone)]
pub enum ColumnMutation {
    Create(Column),
    Update { id: ColumnId, patch: ColumnPatch },
    Reorder { id: ColumnId, position: f64 },
    Delete { id: ColumnId },
}

#[derive(Debug, Default)]
pub struct ColumnStore {
    lists: OrderedLists<Column>,
    journal: MutationJournal<Column>,
}

impl ColumnStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self, board_id: BoardId) -> &[Column] {
        self.lists.list(board_id)
    }

    pub fn get(&self, id: ColumnId) -> Option<&Column> {
        self.lists.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Column> + '_ {
        self.lists.iter()
    }

    pub fn position_for_index(&self, board_id: BoardId, id: ColumnId, index: usize) -> Option<f64> {
        position_for_move(self.columns(board_id), id, index)
    }

    /// Assigns evenly spaced positions to a board's columns and returns the changed ones.
    pub fn renumber(&mut self, board_id: BoardId) -> Vec<Column> {
        let Some(list) = self.lists.list_mut(board_id) else {
            return Vec::new();
        };
        let before: Vec<(ColumnId, f64)> = list.iter().map(|c| (c.id, c.position)).collect();
        renumber(list);
        list.iter()
            .filter(|column| {
                before
                    .iter()
                    .any(|(id, position)| *id == column.id && *position != column.position)
            })
            .cloned()
            .collect()
    }

    /// Forgets every column of a deleted board.
    pub fn drop_board(&mut self, board_id: BoardId) -> Vec<Column> {
        self.lists.drop_scope(board_id)
    }

    fn require(&self, id: ColumnId) -> SyncResult<Column> {
        self.lists
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("Column {}", id)))
    }
}

impl EntityStore for ColumnStore {
    type Entity = Column;
    type Scope = BoardId;
    type Mutation = ColumnMutation;
    type Event = ColumnEvent;

    fn load(&mut self, board_id: BoardId, mut columns: Vec<Column>) {
        let pending: Vec<Column> = self
            .journal
            .pending_creates()
            .filter_map(|id| self.lists.get(id))
            .filter(|column| column.board_id == board_id)
            .cloned()
            .collect();
        columns.extend(pending);
        debug!(board_id, count = columns.len(), "Loaded columns");
        self.lists.replace_scope(board_id, columns);
    }

    fn apply_optimistic(&mut self, mutation: ColumnMutation) -> SyncResult<MutationId> {
        match mutation {
            ColumnMutation::Create(mut column) => {
                column.id = self.journal.allocate_local_id();
                let id = column.id;
                self.lists.upsert(column);
                Ok(self.journal.record(MutationKind::Create, id, None))
            }
            ColumnMutation::Update { id, patch } => {
                let before = self.require(id)?;
                let mut after = before.clone();
                after.update(patch);
                self.lists.upsert(after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            ColumnMutation::Reorder { id, position } => {
                if !position.is_finite() {
                    return Err(SyncError::Validation(
                        "Column position must be a finite number".to_string(),
                    ));
                }
                let before = self.require(id)?;
                let mut after = before.clone();
                after.update_position(position);
                self.lists.upsert(after);
                Ok(self.journal.record(MutationKind::Move, id, Some(before)))
            }
            ColumnMutation::Delete { id } => {
                let before = self
                    .lists
                    .remove(id)
                    .ok_or_else(|| SyncError::NotFound(format!("Column {}", id)))?;
                Ok(self.journal.record(MutationKind::Delete, id, Some(before)))
            }
        }
    }

    fn confirm(&mut self, mutation_id: MutationId, server: Option<Column>) {
        match (self.journal.take(mutation_id), server) {
            (Some(pending), Some(_)) if pending.deleted_remotely => {
                debug!(%mutation_id, column_id = pending.entity_id, "Column was deleted remotely, dropping confirmation");
                self.lists.remove(pending.entity_id);
            }
            (Some(pending), Some(column)) => {
                if pending.entity_id != column.id {
                    self.lists.remove(pending.entity_id);
                }
                self.lists.upsert(column);
            }
            (Some(pending), None) => {
                self.lists.remove(pending.entity_id);
            }
            (None, Some(column)) => {
                self.lists.upsert(column);
            }
            (None, None) => debug!(%mutation_id, "Nothing to confirm"),
        }
    }

    fn rollback(&mut self, mutation_id: MutationId) -> bool {
        let Some(pending) = self.journal.take(mutation_id) else {
            warn!(%mutation_id, "Rollback requested for unknown column mutation");
            return false;
        };
        let column_id = pending.entity_id;
        self.lists.remove(column_id);
        if let Some(before) = pending.restorable() {
            self.lists.upsert(before);
        }
        warn!(%mutation_id, column_id, "Rolled back column mutation");
        true
    }

    fn apply_remote_event(&mut self, event: ColumnEvent) -> Applied {
        match event {
            ColumnEvent::Created(column) | ColumnEvent::Updated(column) => {
                self.lists.upsert(column).into()
            }
            // Upsert re-sorts the board's columns by the new position.
            ColumnEvent::Reordered(column) => {
                self.lists.upsert(column);
                Applied::Moved
            }
            ColumnEvent::Deleted(id) => {
                self.journal.mark_deleted(id);
                match self.lists.remove(id) {
                    Some(_) => Applied::Removed,
                    None => Applied::Ignored,
                }
            }
        }
    }

    fn pending_entity(&self, mutation_id: MutationId) -> Option<Column> {
        let pending = self.journal.get(mutation_id)?;
        self.lists.get(pending.entity_id).cloned()
    }

    fn pending_target(&self, mutation_id: MutationId) -> Option<i64> {
        self.journal.get(mutation_id).map(|pending| pending.entity_id)
    }
}
