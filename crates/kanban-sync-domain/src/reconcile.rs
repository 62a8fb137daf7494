//! Routes remote events to the store that owns the affected entity.
//!
//! Dispatch holds no merge rules of its own. Redelivered events and events for
//! entities this session never loaded are absorbed by the stores' upsert and
//! no-op semantics, so calling `dispatch` twice with one event is harmless.

use serde_json::Value;
use tracing::{debug, warn};

use crate::event::{RemoteEvent, RemoteEventKind};
use crate::sprint_workflow;
use crate::state::BoardState;
use crate::store::{Applied, EntityStore};

pub fn dispatch(state: &mut BoardState, event: RemoteEvent) -> Applied {
    let event_type = event.event_type();
    let applied = match event.kind {
        RemoteEventKind::Board(event) => state.boards.apply_remote_event(event),
        RemoteEventKind::Column(event) => state.columns.apply_remote_event(event),
        RemoteEventKind::Card(event) => state.cards.apply_remote_event(event),
        // Sprint events may carry a completion, which also touches cards.
        RemoteEventKind::Sprint(event) => sprint_workflow::apply_remote(state, event).applied,
    };
    debug!(
        event_type,
        board_id = ?event.board_id,
        triggered_by = ?event.triggered_by,
        ?applied,
        "Applied remote event"
    );
    applied
}

/// Decodes and dispatches a raw broker message. Malformed or unrecognized
/// messages are logged and dropped; `None` means the message was discarded.
pub fn dispatch_raw(state: &mut BoardState, text: &str) -> Option<Applied> {
    match RemoteEvent::decode(text) {
        Ok(event) => Some(dispatch(state, event)),
        Err(e) => {
            warn!(error = %e, "Dropping remote event");
            None
        }
    }
}

pub fn dispatch_value(state: &mut BoardState, value: Value) -> Option<Applied> {
    match RemoteEvent::from_value(value) {
        Ok(event) => Some(dispatch(state, event)),
        Err(e) => {
            warn!(error = %e, "Dropping remote event");
            None
        }
    }
}
