use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::BoardId;
use crate::field_update::FieldUpdate;
use crate::position::Positioned;

pub type ColumnId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub position: f64,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Column {
    pub fn new(id: ColumnId, board_id: BoardId, name: String, position: f64) -> Self {
        Self {
            id,
            board_id,
            name,
            description: None,
            position,
            bg_color: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn update_position(&mut self, position: f64) {
        self.position = position;
        self.updated_at = Some(Utc::now());
    }

    pub fn update(&mut self, patch: ColumnPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        patch.description.apply_to(&mut self.description);
        patch.bg_color.apply_to(&mut self.bg_color);
        self.updated_at = Some(Utc::now());
    }
}

impl Positioned for Column {
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

/// Partial update for Column. Position changes go through a reorder instead.
#[derive(Debug, Clone, Default)]
pub struct ColumnPatch {
    pub name: Option<String>,
    pub description: FieldUpdate<String>,
    pub bg_color: FieldUpdate<String>,
}
