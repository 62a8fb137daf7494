//! Sprint lifecycle rules layered over the sprint and card stores.
//!
//! `PLANNED -> ACTIVE -> COMPLETED`, at most one active sprint per board.
//! Completing a sprint sends its unfinished cards back to the backlog, but only
//! once the server has confirmed the completion (a confirmed response or a
//! remote `SPRINT_UPDATED` carrying `COMPLETED`), never optimistically.

use kanban_sync_core::{SyncError, SyncResult};
use tracing::info;

use crate::card::{CardId, CardPatch};
use crate::event::SprintEvent;
use crate::field_update::FieldUpdate;
use crate::state::BoardState;
use crate::store::{Applied, CardMutation, EntityStore, MutationId, SprintMutation};
use crate::{BoardId, Sprint, SprintId, SprintPatch, SprintStatus};

/// Outcome of settling a sprint mutation or a remote sprint event.
#[derive(Debug, Clone, PartialEq)]
pub struct SprintSettled {
    pub applied: Applied,
    /// Cards returned to the backlog because the sprint completed.
    pub detached: Vec<CardId>,
}

pub fn create(
    state: &mut BoardState,
    board_id: BoardId,
    name: String,
    patch: SprintPatch,
) -> SyncResult<MutationId> {
    if let Some(board) = state.boards.get(board_id) {
        if !board.is_sprint_enabled() {
            return Err(SyncError::Validation(format!(
                "Board '{}' is not in sprint mode",
                board.name
            )));
        }
    }
    let mut sprint = Sprint::new(0, board_id, name);
    sprint.update(patch);
    state.sprints.apply_optimistic(SprintMutation::Create(sprint))
}

/// Rename, re-date or re-capacity. Rejected once the sprint is completed.
pub fn edit(state: &mut BoardState, sprint_id: SprintId, patch: SprintPatch) -> SyncResult<MutationId> {
    state
        .sprints
        .apply_optimistic(SprintMutation::Update { id: sprint_id, patch })
}

pub fn start(state: &mut BoardState, sprint_id: SprintId) -> SyncResult<MutationId> {
    state.sprints.apply_optimistic(SprintMutation::Transition {
        id: sprint_id,
        to: SprintStatus::Active,
    })
}

/// Marks the sprint completed locally. Cards are detached by `confirm`.
pub fn complete(state: &mut BoardState, sprint_id: SprintId) -> SyncResult<MutationId> {
    state.sprints.apply_optimistic(SprintMutation::Transition {
        id: sprint_id,
        to: SprintStatus::Completed,
    })
}

pub fn confirm(
    state: &mut BoardState,
    mutation_id: MutationId,
    server: Option<Sprint>,
) -> SprintSettled {
    let completed = server
        .as_ref()
        .filter(|sprint| sprint.status == SprintStatus::Completed)
        .map(|sprint| sprint.id);
    state.sprints.confirm(mutation_id, server);
    SprintSettled {
        applied: Applied::Replaced,
        detached: detach_if_completed(state, completed),
    }
}

pub fn apply_remote(state: &mut BoardState, event: SprintEvent) -> SprintSettled {
    let completed = match &event {
        SprintEvent::Created(sprint) | SprintEvent::Updated(sprint)
            if sprint.status == SprintStatus::Completed =>
        {
            Some(sprint.id)
        }
        _ => None,
    };
    let applied = state.sprints.apply_remote_event(event);
    SprintSettled {
        applied,
        detached: detach_if_completed(state, completed),
    }
}

fn detach_if_completed(state: &mut BoardState, completed: Option<SprintId>) -> Vec<CardId> {
    let Some(sprint_id) = completed else {
        return Vec::new();
    };
    let detached = state.cards.detach_sprint(sprint_id);
    if !detached.is_empty() {
        info!(sprint_id, count = detached.len(), "Sprint completed, cards returned to backlog");
    }
    detached
}

/// Moves backlog cards into a sprint. Every card is checked before any is changed.
pub fn assign_cards(
    state: &mut BoardState,
    sprint_id: SprintId,
    card_ids: &[CardId],
) -> SyncResult<Vec<MutationId>> {
    let sprint = state
        .sprints
        .get(sprint_id)
        .ok_or_else(|| SyncError::NotFound(format!("Sprint {}", sprint_id)))?;
    if sprint.status.is_terminal() {
        return Err(SyncError::Validation(format!(
            "Sprint '{}' is completed",
            sprint.name
        )));
    }
    for card_id in card_ids {
        if state.cards.get(*card_id).is_none() {
            return Err(SyncError::NotFound(format!("Card {}", card_id)));
        }
    }

    card_ids
        .iter()
        .map(|card_id| {
            state.cards.apply_optimistic(CardMutation::Update {
                id: *card_id,
                patch: CardPatch {
                    sprint_id: FieldUpdate::Set(sprint_id),
                    ..Default::default()
                },
            })
        })
        .collect()
}

/// Returns a card to the backlog.
pub fn remove_card(state: &mut BoardState, card_id: CardId) -> SyncResult<MutationId> {
    state.cards.apply_optimistic(CardMutation::Update {
        id: card_id,
        patch: CardPatch {
            sprint_id: FieldUpdate::Clear,
            ..Default::default()
        },
    })
}
