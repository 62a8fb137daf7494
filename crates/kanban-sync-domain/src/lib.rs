pub mod board;
pub mod card;
pub mod column;
pub mod event;
pub mod field_update;
pub mod label;
pub mod position;
pub mod reconcile;
pub mod sprint;
pub mod sprint_workflow;
pub mod state;
pub mod store;

pub use board::{Board, BoardId, BoardMode, BoardPatch};
pub use card::{Card, CardId, CardPatch, CardPriority};
pub use column::{Column, ColumnId, ColumnPatch};
pub use event::{
    BoardEvent, CardEvent, CardMove, ColumnEvent, DecodeError, RemoteEvent, RemoteEventKind,
    SprintEvent, UserId,
};
pub use field_update::FieldUpdate;
pub use label::{Label, LabelId};
pub use position::{Positioned, POSITION_STEP};
pub use reconcile::{dispatch, dispatch_raw, dispatch_value};
pub use sprint::{Sprint, SprintId, SprintPatch, SprintStatus};
pub use sprint_workflow::SprintSettled;
pub use state::{BoardState, Snapshot};
pub use store::{
    Applied, BoardMutation, BoardStore, CardMutation, CardStore, ColumnMutation, ColumnStore,
    EntityStore, MutationId, SprintMutation, SprintStore,
};
