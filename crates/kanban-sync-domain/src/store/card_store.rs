use std::collections::BTreeMap;

use kanban_sync_core::{SyncError, SyncResult};
use tracing::{debug, warn};

use super::journal::{MutationId, MutationJournal, MutationKind};
use super::ordered::OrderedLists;
use super::{Applied, EntityStore};
use crate::card::{Card, CardId, CardPatch};
use crate::column::ColumnId;
use crate::event::{CardEvent, CardMove};
use crate::position::{position_for_index, position_for_move, renumber};
use crate::sprint::SprintId;

#[derive(Debug, Clone)]
pub enum CardMutation {
    /// The card's id is replaced by a temporary local id.
    Create(Card),
    Update {
        id: CardId,
        patch: CardPatch,
    },
    Move {
        id: CardId,
        column_id: ColumnId,
        position: f64,
    },
    Delete {
        id: CardId,
    },
}

/// Cards grouped per column in position order. Archived cards are kept aside:
/// they appear in no column list but stay known until a delete is processed.
#[derive(Debug, Default)]
pub struct CardStore {
    lists: OrderedLists<Card>,
    archived: BTreeMap<CardId, Card>,
    journal: MutationJournal<Card>,
}

impl CardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cards(&self, column_id: ColumnId) -> &[Card] {
        self.lists.list(column_id)
    }

    /// Active or archived.
    pub fn get(&self, id: CardId) -> Option<&Card> {
        self.lists.get(id).or_else(|| self.archived.get(&id))
    }

    pub fn archived(&self) -> impl Iterator<Item = &Card> + '_ {
        self.archived.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &Card> + '_ {
        self.lists.iter()
    }

    /// Columns whose active list holds `id`. At most one after every operation.
    pub fn columns_containing(&self, id: CardId) -> Vec<ColumnId> {
        self.lists.scopes_containing(id)
    }

    pub fn children(&self, parent_id: CardId) -> Vec<&Card> {
        self.active()
            .chain(self.archived())
            .filter(|card| card.parent_card_id == Some(parent_id))
            .collect()
    }

    pub fn sprint_cards(&self, sprint_id: SprintId) -> Vec<&Card> {
        self.active()
            .filter(|card| card.sprint_id == Some(sprint_id))
            .collect()
    }

    pub fn backlog(&self) -> Vec<&Card> {
        self.active().filter(|card| card.is_in_backlog()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.journal.len()
    }

    /// Position that places a card at `index` of `column_id`. `None` means
    /// the neighbours are too close and the column must be renumbered first.
    pub fn position_for_index(
        &self,
        column_id: ColumnId,
        index: usize,
        moving: Option<CardId>,
    ) -> Option<f64> {
        let siblings = self.cards(column_id);
        match moving {
            Some(id) => position_for_move(siblings, id, index),
            None => position_for_index(siblings, index),
        }
    }

    /// Assigns evenly spaced positions to a column and returns the changed cards.
    pub fn renumber(&mut self, column_id: ColumnId) -> Vec<Card> {
        let Some(list) = self.lists.list_mut(column_id) else {
            return Vec::new();
        };
        let before: Vec<(CardId, f64)> = list.iter().map(|c| (c.id, c.position)).collect();
        renumber(list);
        list.iter()
            .filter(|card| {
                before
                    .iter()
                    .any(|(id, position)| *id == card.id && *position != card.position)
            })
            .cloned()
            .collect()
    }

    /// Sends every unfinished card of a completed sprint back to the backlog.
    /// Completed cards keep their sprint reference.
    pub fn detach_sprint(&mut self, sprint_id: SprintId) -> Vec<CardId> {
        let mut detached = Vec::new();
        for card in self.lists.iter_mut().chain(self.archived.values_mut()) {
            if card.detach_from_sprint(sprint_id) {
                detached.push(card.id);
            }
        }
        if !detached.is_empty() {
            debug!(sprint_id, count = detached.len(), "Detached cards to backlog");
        }
        detached
    }

    fn place(&mut self, card: Card) -> Applied {
        if card.is_archived {
            self.lists.remove(card.id);
            self.archived.insert(card.id, card);
            Applied::Archived
        } else {
            self.archived.remove(&card.id);
            self.lists.upsert(card).into()
        }
    }

    fn remove_everywhere(&mut self, id: CardId) -> Option<Card> {
        let active = self.lists.remove(id);
        let archived = self.archived.remove(&id);
        active.or(archived)
    }

    fn validate_parent(&self, card_id: CardId, parent_id: CardId) -> SyncResult<()> {
        if parent_id == card_id {
            return Err(SyncError::Validation(
                "A card cannot be its own parent".to_string(),
            ));
        }
        if self
            .get(parent_id)
            .is_some_and(|parent| parent.parent_card_id.is_some())
        {
            return Err(SyncError::Validation(
                "A child card cannot have children of its own".to_string(),
            ));
        }
        if !self.children(card_id).is_empty() {
            return Err(SyncError::Validation(
                "A card with children cannot become a child".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_move(&mut self, mv: CardMove) -> Applied {
        let local = self.get(mv.id).cloned();
        let Some(mut card) = mv.card.or(local) else {
            debug!(card_id = mv.id, "Move for unknown card without payload, ignoring");
            return Applied::Ignored;
        };
        card.id = mv.id;

        if card.is_archived {
            self.lists.remove(card.id);
            card.column_id = mv.column_id;
            card.position = mv.position;
            self.archived.insert(card.id, card);
            return Applied::Archived;
        }

        self.archived.remove(&card.id);
        // The local view of the source column may be stale; clear every copy.
        self.lists.relocate(card, mv.column_id, mv.position);
        Applied::Moved
    }
}

impl EntityStore for CardStore {
    type Entity = Card;
    type Scope = ColumnId;
    type Mutation = CardMutation;
    type Event = CardEvent;

    fn load(&mut self, column_id: ColumnId, cards: Vec<Card>) {
        let (archived, mut active): (Vec<Card>, Vec<Card>) =
            cards.into_iter().partition(|card| card.is_archived);

        for card in archived {
            self.lists.remove(card.id);
            self.archived.insert(card.id, card);
        }
        for card in &active {
            self.archived.remove(&card.id);
        }

        // Unconfirmed creates are not on the server yet; keep them visible.
        let pending: Vec<Card> = self
            .journal
            .pending_creates()
            .filter_map(|id| self.lists.get(id))
            .filter(|card| card.column_id == column_id)
            .cloned()
            .collect();
        active.extend(pending);

        debug!(column_id, count = active.len(), "Loaded cards");
        self.lists.replace_scope(column_id, active);
    }

    fn apply_optimistic(&mut self, mutation: CardMutation) -> SyncResult<MutationId> {
        match mutation {
            CardMutation::Create(mut card) => {
                if !card.position.is_finite() {
                    return Err(SyncError::Validation(
                        "Card position must be a finite number".to_string(),
                    ));
                }
                if let Some(parent_id) = card.parent_card_id {
                    if self
                        .get(parent_id)
                        .is_some_and(|parent| parent.parent_card_id.is_some())
                    {
                        return Err(SyncError::Validation(
                            "A child card cannot have children of its own".to_string(),
                        ));
                    }
                }
                card.id = self.journal.allocate_local_id();
                let id = card.id;
                self.place(card);
                Ok(self.journal.record(MutationKind::Create, id, None))
            }
            CardMutation::Update { id, patch } => {
                let before = self
                    .get(id)
                    .cloned()
                    .ok_or_else(|| SyncError::NotFound(format!("Card {}", id)))?;
                if let Some(parent_id) = patch.parent_card_id.as_set() {
                    self.validate_parent(id, *parent_id)?;
                }
                let mut after = before.clone();
                after.update(patch);
                self.place(after);
                Ok(self.journal.record(MutationKind::Update, id, Some(before)))
            }
            CardMutation::Move {
                id,
                column_id,
                position,
            } => {
                let before = self
                    .lists
                    .get(id)
                    .cloned()
                    .ok_or_else(|| SyncError::NotFound(format!("Card {}", id)))?;
                if !position.is_finite() {
                    return Err(SyncError::Validation(
                        "Card position must be a finite number".to_string(),
                    ));
                }
                let mut after = before.clone();
                after.move_to_column(column_id, position);
                self.lists.relocate(after, column_id, position);
                Ok(self.journal.record(MutationKind::Move, id, Some(before)))
            }
            CardMutation::Delete { id } => {
                let before = self
                    .remove_everywhere(id)
                    .ok_or_else(|| SyncError::NotFound(format!("Card {}", id)))?;
                Ok(self.journal.record(MutationKind::Delete, id, Some(before)))
            }
        }
    }

    fn confirm(&mut self, mutation_id: MutationId, server: Option<Card>) {
        let pending = self.journal.take(mutation_id);
        match (pending, server) {
            (Some(pending), Some(card)) if pending.deleted_remotely => {
                debug!(%mutation_id, card_id = card.id, "Card was deleted remotely, dropping confirmation");
                self.remove_everywhere(pending.entity_id);
            }
            (Some(pending), Some(card)) => {
                if pending.entity_id != card.id {
                    self.remove_everywhere(pending.entity_id);
                }
                self.place(card);
            }
            (Some(pending), None) => {
                self.remove_everywhere(pending.entity_id);
            }
            (None, Some(card)) => {
                debug!(%mutation_id, card_id = card.id, "Confirming settled mutation");
                self.place(card);
            }
            (None, None) => {
                debug!(%mutation_id, "Nothing to confirm");
            }
        }
    }

    fn rollback(&mut self, mutation_id: MutationId) -> bool {
        let Some(pending) = self.journal.take(mutation_id) else {
            warn!(%mutation_id, "Rollback requested for unknown card mutation");
            return false;
        };
        let (card_id, kind) = (pending.entity_id, pending.kind);
        self.remove_everywhere(card_id);
        if let Some(before) = pending.restorable() {
            self.place(before);
        }
        warn!(%mutation_id, card_id, ?kind, "Rolled back card mutation");
        true
    }

    fn apply_remote_event(&mut self, event: CardEvent) -> Applied {
        match event {
            CardEvent::Created(card) | CardEvent::Updated(card) => self.place(card),
            CardEvent::Deleted(id) => {
                self.journal.mark_deleted(id);
                match self.remove_everywhere(id) {
                    Some(_) => Applied::Removed,
                    None => Applied::Ignored,
                }
            }
            CardEvent::Moved(mv) => self.apply_move(mv),
        }
    }

    fn pending_entity(&self, mutation_id: MutationId) -> Option<Card> {
        let pending = self.journal.get(mutation_id)?;
        self.get(pending.entity_id).cloned()
    }

    fn pending_target(&self, mutation_id: MutationId) -> Option<i64> {
        self.journal.get(mutation_id).map(|pending| pending.entity_id)
    }
}
