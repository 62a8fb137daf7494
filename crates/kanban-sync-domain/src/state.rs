//! The aggregate of all entity stores for one client session.
//!
//! `Snapshot` is the serializable, point-in-time form of the same data. It is
//! what a full `load` of every scope produces and what tooling reads and writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::position::is_sorted_by_position;
use crate::store::{BoardStore, CardStore, ColumnStore, EntityStore, SprintStore};
use crate::{Board, BoardId, Card, Column, ColumnId, Sprint};

#[derive(Debug, Default)]
pub struct BoardState {
    pub boards: BoardStore,
    pub columns: ColumnStore,
    pub cards: CardStore,
    pub sprints: SprintStore,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut state = Self::new();
        state.load_snapshot(snapshot);
        state
    }

    /// Loads every scope present in the snapshot. Scopes absent from it are untouched.
    pub fn load_snapshot(&mut self, snapshot: Snapshot) {
        self.boards.load((), snapshot.boards);

        let mut columns: BTreeMap<BoardId, Vec<Column>> = BTreeMap::new();
        for column in snapshot.columns {
            columns.entry(column.board_id).or_default().push(column);
        }
        for (board_id, list) in columns {
            self.columns.load(board_id, list);
        }

        let mut cards: BTreeMap<ColumnId, Vec<Card>> = BTreeMap::new();
        for card in snapshot.cards {
            cards.entry(card.column_id).or_default().push(card);
        }
        for (column_id, list) in cards {
            self.cards.load(column_id, list);
        }

        let mut sprints: BTreeMap<BoardId, Vec<Sprint>> = BTreeMap::new();
        for sprint in snapshot.sprints {
            sprints.entry(sprint.board_id).or_default().push(sprint);
        }
        for (board_id, list) in sprints {
            self.sprints.load(board_id, list);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut cards: Vec<Card> = self.cards.active().cloned().collect();
        cards.extend(self.cards.archived().cloned());
        Snapshot {
            boards: self.boards.all().cloned().collect(),
            columns: self.columns.all().cloned().collect(),
            cards,
            sprints: self.sprints.all().cloned().collect(),
        }
    }

    /// Unassigned, unarchived cards in the board's columns.
    pub fn backlog(&self, board_id: BoardId) -> Vec<&Card> {
        self.columns
            .columns(board_id)
            .iter()
            .flat_map(|column| self.cards.cards(column.id))
            .filter(|card| card.is_in_backlog())
            .collect()
    }

    /// Descriptions of every broken ordering or single-presence property.
    /// Empty for a consistent state.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for board in self.boards.all() {
            if !is_sorted_by_position(self.columns.columns(board.id)) {
                violations.push(format!("columns of board {} are out of order", board.id));
            }
        }
        for column in self.columns.all() {
            if !is_sorted_by_position(self.cards.cards(column.id)) {
                violations.push(format!("cards of column {} are out of order", column.id));
            }
        }
        for card in self.cards.active() {
            let holders = self.cards.columns_containing(card.id);
            if holders.len() > 1 {
                violations.push(format!("card {} is listed in columns {:?}", card.id, holders));
            }
        }
        for board in self.boards.all() {
            let active = self
                .sprints
                .for_board(board.id)
                .filter(|sprint| sprint.is_active())
                .count();
            if active > 1 {
                violations.push(format!("board {} has {} active sprints", board.id, active));
            }
        }

        violations.sort();
        violations.dedup();
        violations
    }
}

/// Point-in-time capture of a session's entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub boards: Vec<Board>,

    #[serde(default)]
    pub columns: Vec<Column>,

    /// Active and archived cards.
    #[serde(default)]
    pub cards: Vec<Card>,

    #[serde(default)]
    pub sprints: Vec<Sprint>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
            && self.columns.is_empty()
            && self.cards.is_empty()
            && self.sprints.is_empty()
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        Snapshot::from_json(
            &json!({
                "boards": [{"id": 1, "name": "Team"}],
                "columns": [
                    {"id": 20, "boardId": 1, "name": "Done", "position": 200},
                    {"id": 10, "boardId": 1, "name": "To Do", "position": 100}
                ],
                "cards": [
                    {"id": 2, "columnId": 10, "title": "B", "position": 20},
                    {"id": 1, "columnId": 10, "title": "A", "position": 10, "sprintId": 5},
                    {"id": 3, "columnId": 20, "title": "C", "position": 5, "isArchived": true}
                ],
                "sprints": [{"id": 5, "boardId": 1, "name": "S1", "status": "ACTIVE"}]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_snapshot_orders_everything() {
        let state = BoardState::from_snapshot(sample());

        let columns: Vec<_> = state.columns.columns(1).iter().map(|c| c.id).collect();
        assert_eq!(columns, vec![10, 20]);
        let cards: Vec<_> = state.cards.cards(10).iter().map(|c| c.id).collect();
        assert_eq!(cards, vec![1, 2]);
        assert!(state.cards.cards(20).is_empty());
        assert!(state.cards.get(3).unwrap().is_archived);
        assert!(state.invariant_violations().is_empty());
    }

    #[test]
    fn test_backlog_excludes_sprint_members() {
        let state = BoardState::from_snapshot(sample());
        let backlog: Vec<_> = state.backlog(1).iter().map(|c| c.id).collect();
        assert_eq!(backlog, vec![2]);
    }

    #[test]
    fn test_snapshot_keeps_archived_cards() {
        let state = BoardState::from_snapshot(sample());
        let snapshot = state.snapshot();
        assert_eq!(snapshot.cards.len(), 3);
        assert_eq!(snapshot.sprints.len(), 1);
        assert!(!snapshot.is_empty());
        assert!(Snapshot::new().is_empty());
    }
}
