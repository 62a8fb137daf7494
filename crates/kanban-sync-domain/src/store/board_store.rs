use std::collections::BTreeMap;

use kanban_sync_core::{SyncError, SyncResult};
use tracing::{debug, warn};

use super::journal::{MutationId, MutationJournal, MutationKind};
use super::{Applied, EntityStore};
use crate::board::{Board, BoardId, BoardPatch};
use crate::event::BoardEvent;

#[derive(Debug, Clone)]
pub enum BoardMutation {
    Create(Board),
    Update { id: BoardId, patch: BoardPatch },
    EnableSprintMode { id: BoardId },
    Delete { id: BoardId },
}

/// Boards visible to the current user. There is a single scope, so `load`
/// takes `()` and replaces everything.
#[derive(Debug, Default)]
pub struct BoardStore {
    boards: BTreeMap<BoardId, Board>,
    journal: MutationJournal<Board>,
}

impl BoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BoardId) -> Option<&Board> {
        self.boards.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Board> + '_ {
        self.boards.values()
    }

    pub fn is_sprint_enabled(&self, id: BoardId) -> bool {
        self.get(id).is_some_and(Board::is_sprint_enabled)
    }

    /// Stores a server copy. Sprint mode is one-way: a stale copy still in
    /// kanban mode does not downgrade a board already known to be in sprint mode.
    fn merge(&mut self, mut board: Board) -> Applied {
        match self.boards.get(&board.id) {
            Some(existing) => {
                if existing.is_sprint_enabled() && !board.is_sprint_enabled() {
                    warn!(board_id = board.id, "Ignoring sprint mode downgrade");
                    board.mode = existing.mode;
                }
                self.boards.insert(board.id, board);
                Applied::Replaced
            }
            None => {
                self.boards.insert(board.id, board);
                Applied::Inserted
            }
        }
    }

    fn require(&self, id: BoardId) -> SyncResult<Board> {
        self.boards
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("Board {}", id)))
    }
}

impl EntityStore for BoardStore {
    type Entity = Board;
    type Scope = ();
    type Mutation = BoardMutation;
    type Event = BoardEvent;

    fn load(&mut self, _scope: (), boards: Vec<Board>) {
        let pending: Vec<Board> = self
            .journal
            .pending_creates()
            .filter_map(|id| self.boards.get(&id).cloned())
            .collect();
        let previous = std::mem::take(&mut self.boards);
        for mut board in boards {
            if let Some(existing) = previous.get(&board.id) {
                if existing.is_sprint_enabled() {
                    board.mode = existing.mode;
                }
            }
            self.boards.insert(board.id, board);
        }
        for board in pending {
            self.boards.insert(board.id, board);
        }
        debug!(count = self.boards.len(), "Loaded boards");
    }

    fn apply_optimistic(&mut self, mutation: BoardMutation) -> SyncResult<MutationId> {
        match mutation {
            BoardMutation::Create(mut board) => {
                board.id = self.journal.allocate_local_id();
                let id = board.id;
                self.boards.insert(id, board);
                Ok(self.journal.record(MutationKind::Create, id, None))
            }
            BoardMutation::Update { id, patch } => {
                let before = self.require(id)?;
                let mut after = before.clone();
                after.update(patch);
                self.boards.insert(id, after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            BoardMutation::EnableSprintMode { id } => {
                let before = self.require(id)?;
                let mut after = before.clone();
                if !after.enable_sprint_mode() {
                    return Err(SyncError::Validation(
                        "Sprint mode is already enabled for this board".to_string(),
                    ));
                }
                self.boards.insert(id, after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            BoardMutation::Delete { id } => {
                let before = self
                    .boards
                    .remove(&id)
                    .ok_or_else(|| SyncError::NotFound(format!("Board {}", id)))?;
                Ok(self.journal.record(MutationKind::Delete, id, Some(before)))
            }
        }
    }

    fn confirm(&mut self, mutation_id: MutationId, server: Option<Board>) {
        match (self.journal.take(mutation_id), server) {
            (Some(pending), Some(_)) if pending.deleted_remotely => {
                debug!(%mutation_id, board_id = pending.entity_id, "Board was deleted remotely, dropping confirmation");
                self.boards.remove(&pending.entity_id);
            }
            (Some(pending), Some(board)) => {
                if pending.entity_id != board.id {
                    self.boards.remove(&pending.entity_id);
                }
                self.merge(board);
            }
            (Some(pending), None) => {
                self.boards.remove(&pending.entity_id);
            }
            (None, Some(board)) => {
                self.merge(board);
            }
            (None, None) => debug!(%mutation_id, "Nothing to confirm"),
        }
    }

    fn rollback(&mut self, mutation_id: MutationId) -> bool {
        let Some(pending) = self.journal.take(mutation_id) else {
            warn!(%mutation_id, "Rollback requested for unknown board mutation");
            return false;
        };
        let board_id = pending.entity_id;
        self.boards.remove(&board_id);
        if let Some(before) = pending.restorable() {
            self.boards.insert(before.id, before);
        }
        warn!(%mutation_id, board_id, "Rolled back board mutation");
        true
    }

    fn apply_remote_event(&mut self, event: BoardEvent) -> Applied {
        match event {
            BoardEvent::Updated(board) => self.merge(board),
            BoardEvent::Deleted(id) => {
                self.journal.mark_deleted(id);
                match self.boards.remove(&id) {
                    Some(_) => Applied::Removed,
                    None => Applied::Ignored,
                }
            }
        }
    }

    fn pending_entity(&self, mutation_id: MutationId) -> Option<Board> {
        let pending = self.journal.get(mutation_id)?;
        self.boards.get(&pending.entity_id).cloned()
    }

    fn pending_target(&self, mutation_id: MutationId) -> Option<i64> {
        self.journal.get(mutation_id).map(|pending| pending.entity_id)
    }
}
