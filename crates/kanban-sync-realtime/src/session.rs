//! One open board: local state, its realtime feed and the REST round trips of
//! every optimistic mutation.
//!
//! A mutation is applied to the stores at once, sent through the
//! [`AuthPipeline`], then either confirmed with the server's copy or rolled
//! back. Remote events from the board topic are dispatched into the same
//! stores by a background task. The state lock is never held across an await.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use kanban_sync_core::{
    Service, SyncConfig, SyncError, SyncResult, TtlCache, ViewMode, ViewSettings,
};
use kanban_sync_domain::position::position_for_index;
use kanban_sync_domain::sprint_workflow;
use kanban_sync_domain::{
    dispatch, Applied, Board, BoardId, BoardMutation, BoardPatch, BoardState, Card, CardEvent,
    CardId, CardMutation, CardPatch, Column, ColumnEvent, ColumnId, ColumnMutation, ColumnPatch,
    EntityStore, MutationId, Snapshot, Sprint, SprintId, SprintPatch, UserId, POSITION_STEP,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::AuthPipeline;
use crate::channel::ChannelManager;
use crate::feed::{BoardFeed, FeedItem};

/// Fetches user avatar images.
#[async_trait]
pub trait AvatarSource: Send + Sync {
    async fn fetch(&self, user_id: UserId) -> SyncResult<Vec<u8>>;
}

/// REST collaborators of a session.
#[derive(Clone)]
pub struct SessionServices {
    pub boards: Arc<dyn Service<Board, BoardId, ()>>,
    pub columns: Arc<dyn Service<Column, ColumnId, BoardId>>,
    pub cards: Arc<dyn Service<Card, CardId, ColumnId>>,
    pub sprints: Arc<dyn Service<Sprint, SprintId, BoardId>>,
    pub avatars: Arc<dyn AvatarSource>,
}

/// Notifications for whoever renders the board.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Remote {
        event_type: &'static str,
        applied: Applied,
    },
    Confirmed {
        entity: &'static str,
        mutation_id: MutationId,
    },
    RolledBack {
        entity: &'static str,
        mutation_id: MutationId,
        /// What to tell the user.
        message: String,
    },
    Reloaded,
    Closed,
}

/// How a store's pending mutations are read, confirmed and undone.
struct Route<E> {
    entity: &'static str,
    pending: fn(&BoardState, MutationId) -> Option<E>,
    confirm: fn(&mut BoardState, MutationId, Option<E>),
    rollback: fn(&mut BoardState, MutationId) -> bool,
}

const BOARDS: Route<Board> = Route {
    entity: "board",
    pending: |state, id| state.boards.pending_entity(id),
    confirm: |state, id, board| state.boards.confirm(id, board),
    rollback: |state, id| state.boards.rollback(id),
};

const COLUMNS: Route<Column> = Route {
    entity: "column",
    pending: |state, id| state.columns.pending_entity(id),
    confirm: |state, id, column| state.columns.confirm(id, column),
    rollback: |state, id| state.columns.rollback(id),
};

const CARDS: Route<Card> = Route {
    entity: "card",
    pending: |state, id| state.cards.pending_entity(id),
    confirm: |state, id, card| state.cards.confirm(id, card),
    rollback: |state, id| state.cards.rollback(id),
};

// Completion side effects live in the sprint workflow, not the store.
const SPRINTS: Route<Sprint> = Route {
    entity: "sprint",
    pending: |state, id| state.sprints.pending_entity(id),
    confirm: |state, id, sprint| {
        sprint_workflow::confirm(state, id, sprint);
    },
    rollback: |state, id| state.sprints.rollback(id),
};

/// State shared with the feed task.
struct Shared {
    state: Mutex<BoardState>,
    closed: AtomicBool,
    changes: broadcast::Sender<SessionChange>,
}

impl Shared {
    fn with_state<R>(&self, f: impl FnOnce(&mut BoardState) -> R) -> SyncResult<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SyncError::Internal("board state lock poisoned".to_string()))?;
        Ok(f(&mut state))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn notify(&self, change: SessionChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }
}

fn required<E>(entity: &'static str, value: Option<E>) -> SyncResult<E> {
    value.ok_or_else(|| SyncError::Internal(format!("no {} representation available", entity)))
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct BoardSession {
    board_id: BoardId,
    shared: Arc<Shared>,
    services: SessionServices,
    auth: Arc<AuthPipeline>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    avatars: Mutex<TtlCache<UserId, Vec<u8>>>,
    view: Mutex<ViewSettings>,
}

impl BoardSession {
    /// Subscribes to the board topic, loads the board, then starts applying
    /// remote events. Events published during the load are queued, not lost.
    pub async fn open(
        board_id: BoardId,
        services: SessionServices,
        auth: Arc<AuthPipeline>,
        channels: &ChannelManager,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let feed = BoardFeed::subscribe(channels, board_id)?;
        let (changes, _) = broadcast::channel(config.subscriber_buffer.max(1));
        let session = Self {
            board_id,
            shared: Arc::new(Shared {
                state: Mutex::new(BoardState::new()),
                closed: AtomicBool::new(false),
                changes,
            }),
            services,
            auth,
            feed_task: Mutex::new(None),
            avatars: Mutex::new(TtlCache::new(config.cache.capacity, config.cache.ttl())),
            view: Mutex::new(config.view.clone()),
        };

        session.reload().await?;

        let handle = tokio::spawn(follow_board(
            feed,
            session.shared.clone(),
            session.services.clone(),
            session.auth.clone(),
        ));
        *lock_or_recover(&session.feed_task) = Some(handle);
        info!(board_id, "Opened board session");
        Ok(session)
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn changes(&self) -> broadcast::Receiver<SessionChange> {
        self.shared.changes.subscribe()
    }

    /// Runs `f` against the current state.
    pub fn read<R>(&self, f: impl FnOnce(&BoardState) -> R) -> SyncResult<R> {
        self.shared.with_state(|state| f(state))
    }

    pub fn snapshot(&self) -> SyncResult<Snapshot> {
        self.read(BoardState::snapshot)
    }

    /// Full refresh of the board, its columns, their cards and its sprints.
    pub async fn reload(&self) -> SyncResult<()> {
        self.ensure_open()?;
        load_board(self.board_id, &self.services, &self.auth, &self.shared).await
    }

    pub async fn update_board(&self, patch: BoardPatch) -> SyncResult<Board> {
        let id = self.board_id;
        let boards_api = &self.services.boards;
        let server = self
            .optimistic(
                &BOARDS,
                |state| {
                    state
                        .boards
                        .apply_optimistic(BoardMutation::Update { id, patch })
                },
                move |board| async move { boards_api.update(id, required("board", board)?).await.map(Some) },
            )
            .await?;
        required("board", server)
    }

    /// One-way switch from kanban to sprint mode.
    pub async fn enable_sprint_mode(&self) -> SyncResult<Board> {
        let id = self.board_id;
        let boards_api = &self.services.boards;
        let server = self
            .optimistic(
                &BOARDS,
                |state| {
                    state
                        .boards
                        .apply_optimistic(BoardMutation::EnableSprintMode { id })
                },
                move |board| async move { boards_api.update(id, required("board", board)?).await.map(Some) },
            )
            .await?;
        required("board", server)
    }

    /// Appends a column to the board.
    pub async fn create_column(&self, name: String, patch: ColumnPatch) -> SyncResult<Column> {
        let board_id = self.board_id;
        let columns_api = &self.services.columns;
        let server = self
            .optimistic(
                &COLUMNS,
                |state| {
                    let position = position_for_index(state.columns.columns(board_id), usize::MAX)
                        .unwrap_or(POSITION_STEP);
                    let mut column = Column::new(0, board_id, name, position);
                    column.update(patch);
                    state.columns.apply_optimistic(ColumnMutation::Create(column))
                },
                move |column| async move { columns_api.create(required("column", column)?).await.map(Some) },
            )
            .await?;
        required("column", server)
    }

    pub async fn update_column(&self, id: ColumnId, patch: ColumnPatch) -> SyncResult<Column> {
        let columns_api = &self.services.columns;
        let server = self
            .optimistic(
                &COLUMNS,
                |state| {
                    state
                        .columns
                        .apply_optimistic(ColumnMutation::Update { id, patch })
                },
                move |column| async move { columns_api.update(id, required("column", column)?).await.map(Some) },
            )
            .await?;
        required("column", server)
    }

    /// Moves a column to `index` among the board's columns.
    pub async fn move_column(&self, id: ColumnId, index: usize) -> SyncResult<Column> {
        let board_id = self.board_id;
        let crowded = self
            .shared
            .with_state(|state| state.columns.position_for_index(board_id, id, index))?
            .is_none();
        if crowded {
            self.renumber_columns().await?;
        }

        let columns_api = &self.services.columns;
        let server = self
            .optimistic(
                &COLUMNS,
                |state| {
                    let position = state
                        .columns
                        .position_for_index(board_id, id, index)
                        .ok_or_else(|| {
                            SyncError::Internal(format!("no free position on board {}", board_id))
                        })?;
                    state
                        .columns
                        .apply_optimistic(ColumnMutation::Reorder { id, position })
                },
                move |column| async move { columns_api.update(id, required("column", column)?).await.map(Some) },
            )
            .await?;
        required("column", server)
    }

    /// Deletes a column. Its cards are left to the server's own cascade.
    pub async fn delete_column(&self, id: ColumnId) -> SyncResult<()> {
        let columns_api = &self.services.columns;
        self.optimistic(
            &COLUMNS,
            |state| state.columns.apply_optimistic(ColumnMutation::Delete { id }),
            move |_| async move { columns_api.delete(id).await.map(|()| None) },
        )
        .await?;
        Ok(())
    }

    /// Appends a card to a column.
    pub async fn create_card(
        &self,
        column_id: ColumnId,
        title: String,
        patch: CardPatch,
    ) -> SyncResult<Card> {
        let cards_api = &self.services.cards;
        let server = self
            .optimistic(
                &CARDS,
                |state| {
                    let position = state
                        .cards
                        .position_for_index(column_id, usize::MAX, None)
                        .unwrap_or(POSITION_STEP);
                    let mut card = Card::new(0, column_id, title, position);
                    card.update(patch);
                    state.cards.apply_optimistic(CardMutation::Create(card))
                },
                move |card| async move { cards_api.create(required("card", card)?).await.map(Some) },
            )
            .await?;
        required("card", server)
    }

    pub async fn update_card(&self, id: CardId, patch: CardPatch) -> SyncResult<Card> {
        let cards_api = &self.services.cards;
        let server = self
            .optimistic(
                &CARDS,
                |state| state.cards.apply_optimistic(CardMutation::Update { id, patch }),
                move |card| async move { cards_api.update(id, required("card", card)?).await.map(Some) },
            )
            .await?;
        required("card", server)
    }

    /// Moves a card to `index` of `column_id`, renumbering that column first
    /// when its neighbours leave no room.
    pub async fn move_card(&self, id: CardId, column_id: ColumnId, index: usize) -> SyncResult<Card> {
        let crowded = self
            .shared
            .with_state(|state| state.cards.position_for_index(column_id, index, Some(id)))?
            .is_none();
        if crowded {
            self.renumber_cards(column_id).await?;
        }

        let cards_api = &self.services.cards;
        let server = self
            .optimistic(
                &CARDS,
                |state| {
                    let position = state
                        .cards
                        .position_for_index(column_id, index, Some(id))
                        .ok_or_else(|| {
                            SyncError::Internal(format!("no free position in column {}", column_id))
                        })?;
                    state.cards.apply_optimistic(CardMutation::Move {
                        id,
                        column_id,
                        position,
                    })
                },
                move |card| async move { cards_api.update(id, required("card", card)?).await.map(Some) },
            )
            .await?;
        required("card", server)
    }

    pub async fn delete_card(&self, id: CardId) -> SyncResult<()> {
        let cards_api = &self.services.cards;
        self.optimistic(
            &CARDS,
            |state| state.cards.apply_optimistic(CardMutation::Delete { id }),
            move |_| async move { cards_api.delete(id).await.map(|()| None) },
        )
        .await?;
        Ok(())
    }

    /// Spreads a column's cards evenly and saves every card that moved.
    pub async fn renumber_cards(&self, column_id: ColumnId) -> SyncResult<()> {
        let changed = self
            .shared
            .with_state(|state| state.cards.renumber(column_id))?;
        info!(column_id, count = changed.len(), "Renumbered cards");

        let cards_api = &self.services.cards;
        for card in changed {
            let id = card.id;
            let saved = self
                .auth
                .execute(move || cards_api.update(id, card.clone()))
                .await;
            self.ensure_open()?;
            match saved {
                Ok(server) => {
                    self.shared
                        .with_state(|state| state.cards.apply_remote_event(CardEvent::Updated(server)))?;
                }
                Err(e) => return Err(self.recover(e).await),
            }
        }
        Ok(())
    }

    /// Spreads the board's columns evenly and saves every column that moved.
    pub async fn renumber_columns(&self) -> SyncResult<()> {
        let board_id = self.board_id;
        let changed = self
            .shared
            .with_state(|state| state.columns.renumber(board_id))?;
        info!(board_id, count = changed.len(), "Renumbered columns");

        let columns_api = &self.services.columns;
        for column in changed {
            let id = column.id;
            let saved = self
                .auth
                .execute(move || columns_api.update(id, column.clone()))
                .await;
            self.ensure_open()?;
            match saved {
                Ok(server) => {
                    self.shared.with_state(|state| {
                        state.columns.apply_remote_event(ColumnEvent::Updated(server))
                    })?;
                }
                Err(e) => return Err(self.recover(e).await),
            }
        }
        Ok(())
    }

    pub async fn create_sprint(&self, name: String, patch: SprintPatch) -> SyncResult<Sprint> {
        let board_id = self.board_id;
        let sprints_api = &self.services.sprints;
        let server = self
            .optimistic(
                &SPRINTS,
                |state| sprint_workflow::create(state, board_id, name, patch),
                move |sprint| async move { sprints_api.create(required("sprint", sprint)?).await.map(Some) },
            )
            .await?;
        required("sprint", server)
    }

    pub async fn edit_sprint(&self, id: SprintId, patch: SprintPatch) -> SyncResult<Sprint> {
        self.sprint_change(id, |state| sprint_workflow::edit(state, id, patch))
            .await
    }

    pub async fn start_sprint(&self, id: SprintId) -> SyncResult<Sprint> {
        self.sprint_change(id, |state| sprint_workflow::start(state, id))
            .await
    }

    /// Completes the sprint. Unfinished cards return to the backlog once the
    /// server confirms.
    pub async fn complete_sprint(&self, id: SprintId) -> SyncResult<Sprint> {
        self.sprint_change(id, |state| sprint_workflow::complete(state, id))
            .await
    }

    /// Moves cards into a sprint. Each card is confirmed or rolled back on its own;
    /// the first failure is returned after every card has settled.
    pub async fn assign_cards(&self, sprint_id: SprintId, card_ids: &[CardId]) -> SyncResult<Vec<Card>> {
        self.ensure_open()?;
        let pending = self.shared.with_state(|state| {
            sprint_workflow::assign_cards(state, sprint_id, card_ids).map(|mutations| {
                mutations
                    .into_iter()
                    .map(|mutation_id| (mutation_id, (CARDS.pending)(state, mutation_id)))
                    .collect::<Vec<_>>()
            })
        })??;

        let cards_api = &self.services.cards;
        let mut saved = Vec::with_capacity(pending.len());
        let mut first_error = None;
        for (mutation_id, card) in pending {
            let result = self
                .settle(&CARDS, mutation_id, card, move |card| async move {
                    let card = required("card", card)?;
                    cards_api.update(card.id, card).await.map(Some)
                })
                .await;
            match result.and_then(|server| required("card", server)) {
                Ok(card) => saved.push(card),
                Err(SyncError::TornDown) => return Err(SyncError::TornDown),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(saved),
        }
    }

    /// Returns a card to the backlog.
    pub async fn remove_card_from_sprint(&self, card_id: CardId) -> SyncResult<Card> {
        let cards_api = &self.services.cards;
        let server = self
            .optimistic(
                &CARDS,
                |state| sprint_workflow::remove_card(state, card_id),
                move |card| async move { cards_api.update(card_id, required("card", card)?).await.map(Some) },
            )
            .await?;
        required("card", server)
    }

    /// Avatar image for `user_id`, from the session cache when still fresh.
    pub async fn avatar(&self, user_id: UserId) -> SyncResult<Vec<u8>> {
        let cached = lock_or_recover(&self.avatars).get(&user_id);
        if let Some(bytes) = cached {
            return Ok(bytes);
        }

        let avatars_api = &self.services.avatars;
        let bytes = self
            .auth
            .execute(move || avatars_api.fetch(user_id))
            .await?;
        self.ensure_open()?;
        lock_or_recover(&self.avatars).insert(user_id, bytes.clone());
        Ok(bytes)
    }

    /// Drops one cached avatar, e.g. after the user uploaded a new one.
    pub fn invalidate_avatar(&self, user_id: UserId) -> bool {
        lock_or_recover(&self.avatars).invalidate(&user_id)
    }

    pub fn clear_avatars(&self) {
        lock_or_recover(&self.avatars).clear();
    }

    pub fn view_settings(&self) -> ViewSettings {
        lock_or_recover(&self.view).clone()
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        lock_or_recover(&self.view).mode = mode;
    }

    pub fn toggle_panel(&self, panel: &str) {
        lock_or_recover(&self.view).toggle_panel(panel);
    }

    pub fn set_show_archived(&self, show: bool) {
        lock_or_recover(&self.view).show_archived = show;
    }

    /// Tears the session down. Responses still in flight are discarded.
    /// Safe to call more than once.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = lock_or_recover(&self.feed_task).take() {
            handle.abort();
        }
        lock_or_recover(&self.avatars).clear();
        self.shared.notify(SessionChange::Closed);
        info!(board_id = self.board_id, "Closed board session");
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            Err(SyncError::TornDown)
        } else {
            Ok(())
        }
    }

    async fn sprint_change(
        &self,
        id: SprintId,
        apply: impl FnOnce(&mut BoardState) -> SyncResult<MutationId>,
    ) -> SyncResult<Sprint> {
        let sprints_api = &self.services.sprints;
        let server = self
            .optimistic(&SPRINTS, apply, move |sprint| async move {
                sprints_api.update(id, required("sprint", sprint)?).await.map(Some)
            })
            .await?;
        required("sprint", server)
    }

    /// Applies a mutation locally, then settles it against the server.
    async fn optimistic<E, Req, Fut>(
        &self,
        route: &Route<E>,
        apply: impl FnOnce(&mut BoardState) -> SyncResult<MutationId>,
        request: Req,
    ) -> SyncResult<Option<E>>
    where
        E: Clone,
        Req: Fn(Option<E>) -> Fut,
        Fut: Future<Output = SyncResult<Option<E>>>,
    {
        self.ensure_open()?;
        let (mutation_id, pending) = self.shared.with_state(|state| {
            apply(state).map(|mutation_id| (mutation_id, (route.pending)(state, mutation_id)))
        })??;
        debug!(entity = route.entity, %mutation_id, "Applied optimistic mutation");
        self.settle(route, mutation_id, pending, request).await
    }

    /// Sends a pending mutation and confirms or rolls it back with the outcome.
    async fn settle<E, Req, Fut>(
        &self,
        route: &Route<E>,
        mutation_id: MutationId,
        pending: Option<E>,
        request: Req,
    ) -> SyncResult<Option<E>>
    where
        E: Clone,
        Req: Fn(Option<E>) -> Fut,
        Fut: Future<Output = SyncResult<Option<E>>>,
    {
        let result = self.auth.execute(|| request(pending.clone())).await;

        if self.is_closed() {
            debug!(entity = route.entity, %mutation_id, "Discarding response for closed session");
            return Err(SyncError::TornDown);
        }

        match result {
            Ok(server) => {
                self.shared
                    .with_state(|state| (route.confirm)(state, mutation_id, server.clone()))?;
                self.shared.notify(SessionChange::Confirmed {
                    entity: route.entity,
                    mutation_id,
                });
                Ok(server)
            }
            Err(e) => {
                self.shared
                    .with_state(|state| (route.rollback)(state, mutation_id))?;
                self.shared.notify(SessionChange::RolledBack {
                    entity: route.entity,
                    mutation_id,
                    message: e.user_message(),
                });
                Err(self.recover(e).await)
            }
        }
    }

    /// Follow-up for a failed request: expired sessions close, conflicts reload.
    async fn recover(&self, e: SyncError) -> SyncError {
        match &e {
            SyncError::SessionExpired => self.close(),
            SyncError::Conflict(_) => {
                if let Err(reload) = self.reload().await {
                    warn!(board_id = self.board_id, error = %reload, "Reload after conflict failed");
                }
            }
            _ => {}
        }
        e
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BoardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardSession")
            .field("board_id", &self.board_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn load_board(
    board_id: BoardId,
    services: &SessionServices,
    auth: &AuthPipeline,
    shared: &Shared,
) -> SyncResult<()> {
    let boards_api = &services.boards;
    let boards = auth.execute(move || boards_api.list(())).await?;

    let columns_api = &services.columns;
    let columns = auth.execute(move || columns_api.list(board_id)).await?;

    let cards_api = &services.cards;
    let mut cards = Vec::with_capacity(columns.len());
    for column_id in columns.iter().map(|column| column.id) {
        let list = auth.execute(move || cards_api.list(column_id)).await?;
        cards.push((column_id, list));
    }

    let sprints_api = &services.sprints;
    let sprints = auth.execute(move || sprints_api.list(board_id)).await?;

    if shared.is_closed() {
        return Err(SyncError::TornDown);
    }
    shared.with_state(|state| {
        state.boards.load((), boards);
        state.columns.load(board_id, columns);
        for (column_id, list) in cards {
            state.cards.load(column_id, list);
        }
        state.sprints.load(board_id, sprints);
    })?;
    info!(board_id, "Reloaded board");
    shared.notify(SessionChange::Reloaded);
    Ok(())
}

async fn follow_board(
    mut feed: BoardFeed,
    shared: Arc<Shared>,
    services: SessionServices,
    auth: Arc<AuthPipeline>,
) {
    let board_id = feed.board_id();
    while let Some(item) = feed.next_item().await {
        if shared.is_closed() {
            break;
        }
        let event = match item {
            FeedItem::Event(event) => event,
            FeedItem::Lagged { missed } => {
                warn!(board_id, missed, "Board events were dropped, reloading");
                if let Err(e) = load_board(board_id, &services, &auth, &shared).await {
                    warn!(board_id, error = %e, "Reload after dropped events failed");
                }
                continue;
            }
        };
        if event.board_id.is_some_and(|id| id != board_id) {
            warn!(board_id, event_board = ?event.board_id, "Dropping event for another board");
            continue;
        }
        let event_type = event.event_type();
        match shared.with_state(|state| dispatch(state, event)) {
            Ok(applied) => shared.notify(SessionChange::Remote {
                event_type,
                applied,
            }),
            Err(e) => {
                error!(board_id, error = %e, "Board state unavailable, stopping feed");
                break;
            }
        }
    }
    feed.close();
}
