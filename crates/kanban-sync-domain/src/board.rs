use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field_update::FieldUpdate;
use crate::label::Label;

pub type BoardId = i64;

/// Once a board is in `Sprint` mode it never goes back to `Kanban`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardMode {
    #[default]
    Kanban,
    Sprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub theme_color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub mode: BoardMode,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Board {
    pub fn new(id: BoardId, name: String) -> Self {
        Self {
            id,
            name,
            description: None,
            theme_color: None,
            icon: None,
            mode: BoardMode::Kanban,
            labels: Vec::new(),
            updated_at: Some(Utc::now()),
        }
    }

    pub fn is_sprint_enabled(&self) -> bool {
        self.mode == BoardMode::Sprint
    }

    /// Returns false when the board was already in sprint mode.
    pub fn enable_sprint_mode(&mut self) -> bool {
        if self.is_sprint_enabled() {
            return false;
        }
        self.mode = BoardMode::Sprint;
        self.updated_at = Some(Utc::now());
        true
    }

    pub fn label(&self, label_id: crate::LabelId) -> Option<&Label> {
        self.labels.iter().find(|l| l.id == label_id)
    }

    pub fn update(&mut self, patch: BoardPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        patch.description.apply_to(&mut self.description);
        patch.theme_color.apply_to(&mut self.theme_color);
        patch.icon.apply_to(&mut self.icon);
        if let Some(labels) = patch.labels {
            self.labels = labels;
        }
        self.updated_at = Some(Utc::now());
    }
}

/// Partial update for Board. Mode is changed only through `enable_sprint_mode`.
#[derive(Debug, Clone, Default)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub description: FieldUpdate<String>,
    pub theme_color: FieldUpdate<String>,
    pub icon: FieldUpdate<String>,
    pub labels: Option<Vec<Label>>,
}
