use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::board::BoardId;
use crate::field_update::FieldUpdate;

pub type SprintId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    Planned,
    Active,
    Completed,
}

impl SprintStatus {
    /// `Planned -> Active -> Completed`; nothing leaves `Completed`.
    pub fn can_transition_to(self, next: SprintStatus) -> bool {
        matches!(
            (self, next),
            (SprintStatus::Planned, SprintStatus::Active)
                | (SprintStatus::Active, SprintStatus::Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SprintStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SprintStatus::Planned => "PLANNED",
            SprintStatus::Active => "ACTIVE",
            SprintStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    pub id: SprintId,
    pub board_id: BoardId,
    pub name: String,
    pub status: SprintStatus,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub goal_text: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Sprint {
    pub fn new(id: SprintId, board_id: BoardId, name: String) -> Self {
        Self {
            id,
            board_id,
            name,
            status: SprintStatus::Planned,
            start_date: None,
            end_date: None,
            goal_text: None,
            capacity: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SprintStatus::Active
    }

    pub fn set_status(&mut self, status: SprintStatus) {
        self.status = status;
        self.updated_at = Some(Utc::now());
    }

    pub fn update(&mut self, patch: SprintPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        patch.start_date.apply_to(&mut self.start_date);
        patch.end_date.apply_to(&mut self.end_date);
        patch.goal_text.apply_to(&mut self.goal_text);
        patch.capacity.apply_to(&mut self.capacity);
        self.updated_at = Some(Utc::now());
    }
}

/// Partial update for Sprint. Status changes go through the sprint workflow.
#[derive(Debug, Clone, Default)]
pub struct SprintPatch {
    pub name: Option<String>,
    pub start_date: FieldUpdate<DateTime<Utc>>,
    pub end_date: FieldUpdate<DateTime<Utc>>,
    pub goal_text: FieldUpdate<String>,
    pub capacity: FieldUpdate<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use SprintStatus::*;
        assert!(Planned.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(!Planned.can_transition_to(Completed));
        assert!(!Active.can_transition_to(Planned));
        for next in [Planned, Active, Completed] {
            assert!(!Completed.can_transition_to(next));
        }
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_patch_keeps_status() {
        let mut sprint = Sprint::new(1, 1, "Sprint 1".to_string());
        sprint.update(SprintPatch {
            name: Some("Sprint One".to_string()),
            capacity: FieldUpdate::Set(40),
            ..Default::default()
        });
        assert_eq!(sprint.name, "Sprint One");
        assert_eq!(sprint.capacity, Some(40));
        assert_eq!(sprint.status, SprintStatus::Planned);
    }
}
