//! Remote change notifications.
//!
//! The broker delivers a loosely typed JSON envelope. It is decoded exactly
//! once, here, into a closed set of variants so stores never have to sniff
//! optional payload fields.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::board::{Board, BoardId};
use crate::card::{Card, CardId};
use crate::column::{Column, ColumnId};
use crate::sprint::Sprint;

pub type UserId = i64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed event envelope: {0}")]
    Envelope(String),

    #[error("unrecognized event type: {0}")]
    UnknownType(String),

    #[error("malformed {event_type} payload: {reason}")]
    Payload {
        event_type: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Updated(Board),
    Deleted(BoardId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnEvent {
    Created(Column),
    Updated(Column),
    Deleted(ColumnId),
    Reordered(Column),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CardEvent {
    Created(Card),
    Updated(Card),
    Deleted(CardId),
    Moved(CardMove),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SprintEvent {
    Created(Sprint),
    Updated(Sprint),
}

/// Target of a `CARD_MOVED` event. `card` is present when the payload carried
/// the full card representation.
#[derive(Debug, Clone, PartialEq)]
pub struct CardMove {
    pub id: CardId,
    pub column_id: ColumnId,
    pub position: f64,
    pub card: Option<Card>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEventKind {
    Board(BoardEvent),
    Column(ColumnEvent),
    Card(CardEvent),
    Sprint(SprintEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub board_id: Option<BoardId>,
    pub triggered_by: Option<UserId>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: RemoteEventKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    board_id: Option<BoardId>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    triggered_by_user_id: Option<UserId>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Delete payloads arrive either as a bare id or as an object carrying `id`.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdPayload {
    Bare(i64),
    Object { id: i64 },
}

impl IdPayload {
    fn id(self) -> i64 {
        match self {
            IdPayload::Bare(id) | IdPayload::Object { id } => id,
        }
    }
}

/// A move carries either the whole card or only where it went.
#[derive(Deserialize)]
#[serde(untagged)]
enum MovePayload {
    Card(Card),
    #[serde(rename_all = "camelCase")]
    Target {
        id: CardId,
        column_id: ColumnId,
        position: f64,
    },
}

impl From<MovePayload> for CardMove {
    fn from(payload: MovePayload) -> Self {
        match payload {
            MovePayload::Card(card) => CardMove {
                id: card.id,
                column_id: card.column_id,
                position: card.position,
                card: Some(card),
            },
            MovePayload::Target {
                id,
                column_id,
                position,
            } => CardMove {
                id,
                column_id,
                position,
                card: None,
            },
        }
    }
}

fn payload<T: DeserializeOwned>(event_type: &'static str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Payload {
        event_type,
        reason: e.to_string(),
    })
}

fn deleted_id(event_type: &'static str, value: Value) -> Result<i64, DecodeError> {
    payload::<IdPayload>(event_type, value).map(IdPayload::id)
}

impl RemoteEvent {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Envelope(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let envelope: Envelope =
            serde_json::from_value(value).map_err(|e| DecodeError::Envelope(e.to_string()))?;
        let body = envelope.payload;

        let kind = match envelope.event_type.as_str() {
            "BOARD_UPDATED" => RemoteEventKind::Board(BoardEvent::Updated(payload(
                "BOARD_UPDATED",
                body,
            )?)),
            "BOARD_DELETED" => {
                RemoteEventKind::Board(BoardEvent::Deleted(deleted_id("BOARD_DELETED", body)?))
            }
            "COLUMN_CREATED" => RemoteEventKind::Column(ColumnEvent::Created(payload(
                "COLUMN_CREATED",
                body,
            )?)),
            "COLUMN_UPDATED" => RemoteEventKind::Column(ColumnEvent::Updated(payload(
                "COLUMN_UPDATED",
                body,
            )?)),
            "COLUMN_DELETED" => RemoteEventKind::Column(ColumnEvent::Deleted(deleted_id(
                "COLUMN_DELETED",
                body,
            )?)),
            "COLUMN_REORDERED" => RemoteEventKind::Column(ColumnEvent::Reordered(payload(
                "COLUMN_REORDERED",
                body,
            )?)),
            "CARD_CREATED" => {
                RemoteEventKind::Card(CardEvent::Created(payload("CARD_CREATED", body)?))
            }
            "CARD_UPDATED" => {
                RemoteEventKind::Card(CardEvent::Updated(payload("CARD_UPDATED", body)?))
            }
            "CARD_DELETED" => {
                RemoteEventKind::Card(CardEvent::Deleted(deleted_id("CARD_DELETED", body)?))
            }
            "CARD_MOVED" => RemoteEventKind::Card(CardEvent::Moved(
                payload::<MovePayload>("CARD_MOVED", body)?.into(),
            )),
            "SPRINT_CREATED" => RemoteEventKind::Sprint(SprintEvent::Created(payload(
                "SPRINT_CREATED",
                body,
            )?)),
            "SPRINT_UPDATED" => RemoteEventKind::Sprint(SprintEvent::Updated(payload(
                "SPRINT_UPDATED",
                body,
            )?)),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };

        Ok(Self {
            board_id: envelope.board_id,
            triggered_by: envelope.triggered_by_user_id,
            timestamp: envelope
                .timestamp
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            kind,
        })
    }

    /// The wire discriminant this event was decoded from.
    pub fn event_type(&self) -> &'static str {
        match &self.kind {
            RemoteEventKind::Board(BoardEvent::Updated(_)) => "BOARD_UPDATED",
            RemoteEventKind::Board(BoardEvent::Deleted(_)) => "BOARD_DELETED",
            RemoteEventKind::Column(ColumnEvent::Created(_)) => "COLUMN_CREATED",
            RemoteEventKind::Column(ColumnEvent::Updated(_)) => "COLUMN_UPDATED",
            RemoteEventKind::Column(ColumnEvent::Deleted(_)) => "COLUMN_DELETED",
            RemoteEventKind::Column(ColumnEvent::Reordered(_)) => "COLUMN_REORDERED",
            RemoteEventKind::Card(CardEvent::Created(_)) => "CARD_CREATED",
            RemoteEventKind::Card(CardEvent::Updated(_)) => "CARD_UPDATED",
            RemoteEventKind::Card(CardEvent::Deleted(_)) => "CARD_DELETED",
            RemoteEventKind::Card(CardEvent::Moved(_)) => "CARD_MOVED",
            RemoteEventKind::Sprint(SprintEvent::Created(_)) => "SPRINT_CREATED",
            RemoteEventKind::Sprint(SprintEvent::Updated(_)) => "SPRINT_UPDATED",
        }
    }

    pub fn local(kind: RemoteEventKind) -> Self {
        Self {
            board_id: None,
            triggered_by: None,
            timestamp: None,
            kind,
        }
    }
}
