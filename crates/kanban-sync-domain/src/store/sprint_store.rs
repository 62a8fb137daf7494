use std::collections::BTreeMap;

use kanban_sync_core::{SyncError, SyncResult};
use tracing::{debug, warn};

use super::journal::{MutationId, MutationJournal, MutationKind};
use super::{Applied, EntityStore};
use crate::board::BoardId;
use crate::event::SprintEvent;
use crate::sprint::{Sprint, SprintId, SprintPatch, SprintStatus};

#[derive(Debug, Clone)]
pub enum SprintMutation {
    Create(Sprint),
    Update { id: SprintId, patch: SprintPatch },
    Transition { id: SprintId, to: SprintStatus },
    Delete { id: SprintId },
}

#[derive(Debug, Default)]
pub struct SprintStore {
    sprints: BTreeMap<SprintId, Sprint>,
    journal: MutationJournal<Sprint>,
}

impl SprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SprintId) -> Option<&Sprint> {
        self.sprints.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Sprint> + '_ {
        self.sprints.values()
    }

    pub fn for_board(&self, board_id: BoardId) -> impl Iterator<Item = &Sprint> + '_ {
        self.sprints
            .values()
            .filter(move |sprint| sprint.board_id == board_id)
    }

    pub fn active_sprint(&self, board_id: BoardId) -> Option<&Sprint> {
        self.for_board(board_id).find(|sprint| sprint.is_active())
    }

    fn require(&self, id: SprintId) -> SyncResult<Sprint> {
        self.sprints
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("Sprint {}", id)))
    }

    /// Status rules for a local transition request.
    pub fn check_transition(&self, sprint: &Sprint, to: SprintStatus) -> SyncResult<()> {
        if !sprint.status.can_transition_to(to) {
            return Err(SyncError::InvalidTransition {
                entity: "sprint",
                from: sprint.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == SprintStatus::Active {
            if let Some(active) = self.active_sprint(sprint.board_id) {
                if active.id != sprint.id {
                    return Err(SyncError::Validation(format!(
                        "Sprint '{}' is already active on this board",
                        active.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn upsert(&mut self, sprint: Sprint) -> Applied {
        if sprint.is_active() {
            if let Some(active) = self.active_sprint(sprint.board_id) {
                if active.id != sprint.id {
                    warn!(
                        board_id = sprint.board_id,
                        active = active.id,
                        incoming = sprint.id,
                        "Server reports a second active sprint"
                    );
                }
            }
        }
        match self.sprints.insert(sprint.id, sprint) {
            Some(_) => Applied::Replaced,
            None => Applied::Inserted,
        }
    }
}

impl EntityStore for SprintStore {
    type Entity = Sprint;
    type Scope = BoardId;
    type Mutation = SprintMutation;
    type Event = SprintEvent;

    fn load(&mut self, board_id: BoardId, sprints: Vec<Sprint>) {
        let pending: Vec<SprintId> = self.journal.pending_creates().collect();
        self.sprints
            .retain(|id, sprint| sprint.board_id != board_id || pending.contains(id));
        debug!(board_id, count = sprints.len(), "Loaded sprints");
        for mut sprint in sprints {
            sprint.board_id = board_id;
            self.sprints.insert(sprint.id, sprint);
        }
    }

    fn apply_optimistic(&mut self, mutation: SprintMutation) -> SyncResult<MutationId> {
        match mutation {
            SprintMutation::Create(mut sprint) => {
                sprint.id = self.journal.allocate_local_id();
                sprint.status = SprintStatus::Planned;
                let id = sprint.id;
                self.sprints.insert(id, sprint);
                Ok(self.journal.record(MutationKind::Create, id, None))
            }
            SprintMutation::Update { id, patch } => {
                let before = self.require(id)?;
                if before.status.is_terminal() {
                    return Err(SyncError::Validation(
                        "A completed sprint can no longer be edited".to_string(),
                    ));
                }
                let mut after = before.clone();
                after.update(patch);
                self.sprints.insert(id, after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            SprintMutation::Transition { id, to } => {
                let before = self.require(id)?;
                self.check_transition(&before, to)?;
                let mut after = before.clone();
                after.set_status(to);
                self.sprints.insert(id, after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            SprintMutation::Delete { id } => {
                let before = self
                    .sprints
                    .remove(&id)
                    .ok_or_else(|| SyncError::NotFound(format!("Sprint {}", id)))?;
                Ok(self.journal.record(MutationKind::Delete, id, Some(before)))
            }
        }
    }

    fn confirm(&mut self, mutation_id: MutationId, server: Option<Sprint>) {
        match (self.journal.take(mutation_id), server) {
            (Some(pending), Some(sprint)) => {
                if pending.entity_id != sprint.id {
                    self.sprints.remove(&pending.entity_id);
                }
                self.upsert(sprint);
            }
            (Some(pending), None) => {
                self.sprints.remove(&pending.entity_id);
            }
            (None, Some(sprint)) => {
                self.upsert(sprint);
            }
            (None, None) => debug!(%mutation_id, "Nothing to confirm"),
        }
    }

    fn rollback(&mut self, mutation_id: MutationId) -> bool {
        let Some(pending) = self.journal.take(mutation_id) else {
            warn!(%mutation_id, "Rollback requested for unknown sprint mutation");
            return false;
        };
        let sprint_id = pending.entity_id;
        self.sprints.remove(&sprint_id);
        if let Some(before) = pending.restorable() {
            self.sprints.insert(before.id, before);
        }
        warn!(%mutation_id, sprint_id, "Rolled back sprint mutation");
        true
    }

    fn apply_remote_event(&mut self, event: SprintEvent) -> Applied {
        match event {
            SprintEvent::Created(sprint) | SprintEvent::Updated(sprint) => self.upsert(sprint),
        }
    }

    fn pending_entity(&self, mutation_id: MutationId) -> Option<Sprint> {
        let pending = self.journal.get(mutation_id)?;
        self.sprints.get(&pending.entity_id).cloned()
    }

    fn pending_target(&self, mutation_id: MutationId) -> Option<i64> {
        self.journal.get(mutation_id).map(|pending| pending.entity_id)
    }
}
