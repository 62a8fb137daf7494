use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::column::ColumnId;
use crate::field_update::FieldUpdate;
use crate::label::LabelId;
use crate::position::Positioned;
use crate::sprint::SprintId;

pub type CardId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub column_id: ColumnId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub position: f64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_card_id: Option<CardId>,
    #[serde(default)]
    pub label_ids: BTreeSet<LabelId>,
    #[serde(default)]
    pub sprint_id: Option<SprintId>,
    #[serde(default)]
    pub priority: Option<CardPriority>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub story_points: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn new(id: CardId, column_id: ColumnId, title: String, position: f64) -> Self {
        Self {
            id,
            column_id,
            title,
            description: None,
            position,
            is_completed: false,
            is_archived: false,
            due_date: None,
            parent_card_id: None,
            label_ids: BTreeSet::new(),
            sprint_id: None,
            priority: None,
            assignee: None,
            bg_color: None,
            story_points: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn move_to_column(&mut self, column_id: ColumnId, position: f64) {
        self.column_id = column_id;
        self.position = position;
        self.updated_at = Some(Utc::now());
    }

    pub fn is_in_backlog(&self) -> bool {
        self.sprint_id.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.due_date.is_some_and(|due| due < now)
    }

    /// Clears the sprint reference when this card is an unfinished member of `sprint_id`.
    pub fn detach_from_sprint(&mut self, sprint_id: SprintId) -> bool {
        if self.sprint_id == Some(sprint_id) && !self.is_completed {
            self.sprint_id = None;
            self.updated_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    pub fn update(&mut self, patch: CardPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        patch.description.apply_to(&mut self.description);
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        if let Some(is_archived) = patch.is_archived {
            self.is_archived = is_archived;
        }
        patch.due_date.apply_to(&mut self.due_date);
        patch.parent_card_id.apply_to(&mut self.parent_card_id);
        if let Some(label_ids) = patch.label_ids {
            self.label_ids = label_ids;
        }
        patch.sprint_id.apply_to(&mut self.sprint_id);
        patch.priority.apply_to(&mut self.priority);
        patch.assignee.apply_to(&mut self.assignee);
        patch.bg_color.apply_to(&mut self.bg_color);
        patch.story_points.apply_to(&mut self.story_points);
        self.updated_at = Some(Utc::now());
    }
}

impl Positioned for Card {
    fn position(&self) -> f64 {
        self.position
    }

    fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    fn ordering_id(&self) -> i64 {
        self.id
    }
}

/// Partial update for Card. Column and position changes are moves, not patches.
#[derive(Debug, Clone, Default)]
pub struct CardPatch {
    pub title: Option<String>,
    pub description: FieldUpdate<String>,
    pub is_completed: Option<bool>,
    pub is_archived: Option<bool>,
    pub due_date: FieldUpdate<DateTime<Utc>>,
    pub parent_card_id: FieldUpdate<CardId>,
    pub label_ids: Option<BTreeSet<LabelId>>,
    pub sprint_id: FieldUpdate<SprintId>,
    pub priority: FieldUpdate<CardPriority>,
    pub assignee: FieldUpdate<String>,
    pub bg_color: FieldUpdate<String>,
    pub story_points: FieldUpdate<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_patch_applies_only_changed_fields() {
        let mut card = Card::new(1, 10, "Write docs".to_string(), 1024.0);
        card.assignee = Some("mina".to_string());
        card.story_points = Some(3);

        card.update(CardPatch {
            title: Some("Write API docs".to_string()),
            assignee: FieldUpdate::Clear,
            label_ids: Some(BTreeSet::from([4, 5])),
            ..Default::default()
        });

        assert_eq!(card.title, "Write API docs");
        assert_eq!(card.assignee, None);
        assert_eq!(card.story_points, Some(3));
        assert_eq!(card.label_ids, BTreeSet::from([4, 5]));
        assert_eq!(card.column_id, 10);
    }

    #[test]
    fn test_detach_from_sprint_skips_completed_and_foreign() {
        let mut open = Card::new(1, 10, "Open".to_string(), 1.0);
        open.sprint_id = Some(5);
        let mut done = open.clone();
        done.is_completed = true;
        let mut other = open.clone();
        other.sprint_id = Some(6);

        assert!(open.detach_from_sprint(5));
        assert!(open.is_in_backlog());
        assert!(!done.detach_from_sprint(5));
        assert_eq!(done.sprint_id, Some(5));
        assert!(!other.detach_from_sprint(5));
        assert_eq!(other.sprint_id, Some(6));
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let mut card = Card::new(1, 10, "Ship".to_string(), 1.0);
        assert!(!card.is_overdue(now));
        card.due_date = Some(now - Duration::days(1));
        assert!(card.is_overdue(now));
        card.is_completed = true;
        assert!(!card.is_overdue(now));
    }

    #[test]
    fn test_deserialize_minimal_wire_card() {
        let card: Card = serde_json::from_str(
            r#"{"id": 42, "columnId": 3, "title": "X", "position": 10, "isCompleted": true, "priority": "HIGH"}"#,
        )
        .unwrap();
        assert_eq!(card.position, 10.0);
        assert!(card.is_completed);
        assert!(!card.is_archived);
        assert_eq!(card.priority, Some(CardPriority::High));
        assert!(card.label_ids.is_empty());
    }
}
