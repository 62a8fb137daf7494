use serde::{Deserialize, Serialize};

pub type LabelId = i64;

/// Labels are owned by the board; cards only hold references to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}
