use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kanban_sync_core::{Service, SyncConfig, SyncError, SyncResult};
use kanban_sync_domain::{
    Board, BoardId, Card, CardId, CardPatch, Column, ColumnId, Snapshot, Sprint, SprintId,
    SprintPatch, SprintStatus, UserId,
};
use kanban_sync_realtime::{
    AuthPipeline, AvatarSource, BoardSession, ChannelManager, ConnectOptions, CredentialRefresher,
    InMemoryBroker, SessionChange, SessionServices,
};

trait Row: Clone + Send + 'static {
    fn row_id(&self) -> i64;
    fn set_row_id(&mut self, id: i64);
    fn table(data: &mut Snapshot) -> &mut Vec<Self>;
}

impl Row for Board {
    fn row_id(&self) -> i64 {
        self.id
    }
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
    fn table(data: &mut Snapshot) -> &mut Vec<Self> {
        &mut data.boards
    }
}

impl Row for Column {
    fn row_id(&self) -> i64 {
        self.id
    }
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
    fn table(data: &mut Snapshot) -> &mut Vec<Self> {
        &mut data.columns
    }
}

impl Row for Card {
    fn row_id(&self) -> i64 {
        self.id
    }
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
    fn table(data: &mut Snapshot) -> &mut Vec<Self> {
        &mut data.cards
    }
}

impl Row for Sprint {
    fn row_id(&self) -> i64 {
        self.id
    }
    fn set_row_id(&mut self, id: i64) {
        self.id = id;
    }
    fn table(data: &mut Snapshot) -> &mut Vec<Self> {
        &mut data.sprints
    }
}

/// Backend of record kept in memory, with injectable failures and latency.
struct FakeBackend {
    data: Mutex<Snapshot>,
    next_id: AtomicI64,
    failures: Mutex<VecDeque<SyncError>>,
    latency: Mutex<Duration>,
    avatar_fetches: AtomicUsize,
}

impl FakeBackend {
    fn new(data: Snapshot) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            next_id: AtomicI64::new(1000),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::ZERO),
            avatar_fetches: AtomicUsize::new(0),
        })
    }

    fn fail_next(&self, error: SyncError) {
        self.failures.lock().unwrap().push_back(error);
    }

    fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    fn edit(&self, f: impl FnOnce(&mut Snapshot)) {
        f(&mut self.data.lock().unwrap());
    }

    fn stored_card(&self, id: CardId) -> Option<Card> {
        self.data.lock().unwrap().cards.iter().find(|c| c.id == id).cloned()
    }

    async fn gate(&self) -> SyncResult<()> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn list_rows<T: Row>(&self, keep: impl Fn(&T) -> bool + Send) -> SyncResult<Vec<T>> {
        self.gate().await?;
        let mut data = self.data.lock().unwrap();
        Ok(T::table(&mut data).iter().filter(|row| keep(row)).cloned().collect())
    }

    async fn create_row<T: Row>(&self, mut row: T) -> SyncResult<T> {
        self.gate().await?;
        row.set_row_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        T::table(&mut self.data.lock().unwrap()).push(row.clone());
        Ok(row)
    }

    async fn update_row<T: Row>(&self, id: i64, row: T) -> SyncResult<T> {
        self.gate().await?;
        let mut data = self.data.lock().unwrap();
        let slot = T::table(&mut data)
            .iter_mut()
            .find(|existing| existing.row_id() == id)
            .ok_or_else(|| SyncError::NotFound(format!("row {}", id)))?;
        *slot = row.clone();
        Ok(row)
    }

    async fn delete_row<T: Row>(&self, id: i64) -> SyncResult<()> {
        self.gate().await?;
        T::table(&mut self.data.lock().unwrap()).retain(|row| row.row_id() != id);
        Ok(())
    }
}

#[async_trait]
impl Service<Board, BoardId, ()> for FakeBackend {
    async fn list(&self, _scope: ()) -> SyncResult<Vec<Board>> {
        self.list_rows(|_: &Board| true).await
    }
    async fn create(&self, board: Board) -> SyncResult<Board> {
        self.create_row(board).await
    }
    async fn update(&self, id: BoardId, board: Board) -> SyncResult<Board> {
        self.update_row(id, board).await
    }
    async fn delete(&self, id: BoardId) -> SyncResult<()> {
        self.delete_row::<Board>(id).await
    }
}

#[async_trait]
impl Service<Column, ColumnId, BoardId> for FakeBackend {
    async fn list(&self, board_id: BoardId) -> SyncResult<Vec<Column>> {
        self.list_rows(move |c: &Column| c.board_id == board_id).await
    }
    async fn create(&self, column: Column) -> SyncResult<Column> {
        self.create_row(column).await
    }
    async fn update(&self, id: ColumnId, column: Column) -> SyncResult<Column> {
        self.update_row(id, column).await
    }
    async fn delete(&self, id: ColumnId) -> SyncResult<()> {
        self.delete_row::<Column>(id).await
    }
}

#[async_trait]
impl Service<Card, CardId, ColumnId> for FakeBackend {
    async fn list(&self, column_id: ColumnId) -> SyncResult<Vec<Card>> {
        self.list_rows(move |c: &Card| c.column_id == column_id).await
    }
    async fn create(&self, card: Card) -> SyncResult<Card> {
        self.create_row(card).await
    }
    async fn update(&self, id: CardId, card: Card) -> SyncResult<Card> {
        self.update_row(id, card).await
    }
    async fn delete(&self, id: CardId) -> SyncResult<()> {
        self.delete_row::<Card>(id).await
    }
}

#[async_trait]
impl Service<Sprint, SprintId, BoardId> for FakeBackend {
    async fn list(&self, board_id: BoardId) -> SyncResult<Vec<Sprint>> {
        self.list_rows(move |s: &Sprint| s.board_id == board_id).await
    }
    async fn create(&self, sprint: Sprint) -> SyncResult<Sprint> {
        self.create_row(sprint).await
    }
    async fn update(&self, id: SprintId, sprint: Sprint) -> SyncResult<Sprint> {
        self.update_row(id, sprint).await
    }
    async fn delete(&self, id: SprintId) -> SyncResult<()> {
        self.delete_row::<Sprint>(id).await
    }
}

#[async_trait]
impl AvatarSource for FakeBackend {
    async fn fetch(&self, user_id: UserId) -> SyncResult<Vec<u8>> {
        self.gate().await?;
        self.avatar_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(vec![user_id as u8])
    }
}

struct FixedRefresher {
    result: Option<String>,
}

#[async_trait]
impl CredentialRefresher for FixedRefresher {
    async fn refresh(&self) -> SyncResult<String> {
        self.result.clone().ok_or(SyncError::Unauthorized)
    }
}

fn seed() -> Snapshot {
    let mut board = Board::new(1, "Team".to_string());
    board.enable_sprint_mode();
    let mut done_card = Card::new(12, 20, "Shipped".to_string(), 2048.0);
    done_card.is_completed = true;
    done_card.sprint_id = Some(7);
    let mut open_card = Card::new(11, 10, "Write tests".to_string(), 1024.0);
    open_card.sprint_id = Some(7);
    let mut sprint = Sprint::new(7, 1, "Sprint 7".to_string());
    sprint.status = SprintStatus::Active;

    Snapshot {
        boards: vec![board],
        columns: vec![
            Column::new(10, 1, "To Do".to_string(), 100.0),
            Column::new(20, 1, "Done".to_string(), 200.0),
        ],
        cards: vec![open_card, done_card],
        sprints: vec![sprint, Sprint::new(8, 1, "Sprint 8".to_string())],
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    broker: InMemoryBroker,
    _channels: ChannelManager,
    session: BoardSession,
}

fn start_channels(broker: &InMemoryBroker, config: &SyncConfig) -> ChannelManager {
    ChannelManager::start(
        Arc::new(broker.clone()),
        ConnectOptions {
            url: "memory://broker".to_string(),
            heartbeat: config.heartbeat(),
            bearer: None,
        },
        config.reconnect_delay(),
        config.subscriber_buffer,
    )
}

fn services(backend: &Arc<FakeBackend>) -> SessionServices {
    SessionServices {
        boards: backend.clone(),
        columns: backend.clone(),
        cards: backend.clone(),
        sprints: backend.clone(),
        avatars: backend.clone(),
    }
}

fn auth(refresher: Option<String>) -> Arc<AuthPipeline> {
    Arc::new(AuthPipeline::new(
        Arc::new(FixedRefresher { result: refresher }),
        Some("token".to_string()),
    ))
}

async fn open_with(refresher: Option<String>) -> Harness {
    let backend = FakeBackend::new(seed());
    let broker = InMemoryBroker::new();
    let config = SyncConfig::default();
    let channels = start_channels(&broker, &config);
    let session = BoardSession::open(1, services(&backend), auth(refresher), &channels, &config)
        .await
        .unwrap();
    Harness {
        backend,
        broker,
        _channels: channels,
        session,
    }
}

async fn open() -> Harness {
    open_with(Some("fresh".to_string())).await
}

fn card_ids(session: &BoardSession, column_id: ColumnId) -> Vec<CardId> {
    session
        .read(|state| state.cards.cards(column_id).iter().map(|c| c.id).collect())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_open_loads_board() {
    let h = open().await;

    assert_eq!(card_ids(&h.session, 10), vec![11]);
    assert_eq!(card_ids(&h.session, 20), vec![12]);
    let active = h
        .session
        .read(|state| state.sprints.active_sprint(1).map(|s| s.id))
        .unwrap();
    assert_eq!(active, Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_create_card_swaps_temporary_id_for_server_id() {
    let h = open().await;
    let mut changes = h.session.changes();

    let card = h
        .session
        .create_card(10, "New".to_string(), CardPatch::default())
        .await
        .unwrap();

    assert!(card.id >= 1000);
    assert_eq!(card_ids(&h.session, 10), vec![11, card.id]);
    assert!(matches!(
        changes.recv().await.unwrap(),
        SessionChange::Confirmed { entity: "card", .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_rolls_back_field_for_field() {
    let h = open().await;
    let before = h.session.read(|s| s.cards.get(11).cloned()).unwrap().unwrap();
    let mut changes = h.session.changes();
    h.backend.fail_next(SyncError::Network("timeout".to_string()));

    let err = h
        .session
        .update_card(
            11,
            CardPatch {
                title: Some("Renamed".to_string()),
                is_completed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    let after = h.session.read(|s| s.cards.get(11).cloned()).unwrap().unwrap();
    assert_eq!(after, before);
    match changes.recv().await.unwrap() {
        SessionChange::RolledBack { message, .. } => {
            assert_eq!(message, "Could not reach the server. Your change was undone.")
        }
        other => panic!("unexpected change {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_conflict_rolls_back_and_reloads() {
    let h = open().await;
    h.backend.edit(|data| {
        data.cards
            .push(Card::new(13, 10, "Added elsewhere".to_string(), 4096.0));
    });
    h.backend
        .fail_next(SyncError::Conflict("card changed".to_string()));

    let err = h.session.move_card(11, 20, 0).await.unwrap_err();

    assert!(matches!(err, SyncError::Conflict(_)));
    assert_eq!(card_ids(&h.session, 10), vec![11, 13]);
    assert_eq!(card_ids(&h.session, 20), vec![12]);
}

#[tokio::test(start_paused = true)]
async fn test_remote_move_is_applied_from_board_topic() {
    let h = open().await;
    let mut changes = h.session.changes();
    while h.broker.subscriber_count("/topic/board/1").await == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.broker
        .publish(
            "/topic/board/1",
            r#"{"type":"CARD_MOVED","boardId":1,"payload":{"id":11,"columnId":20,"position":10}}"#,
        )
        .await;

    let change = changes.recv().await.unwrap();
    assert!(matches!(
        change,
        SessionChange::Remote {
            event_type: "CARD_MOVED",
            ..
        }
    ));
    assert!(card_ids(&h.session, 10).is_empty());
    assert_eq!(card_ids(&h.session, 20), vec![11, 12]);
}

#[tokio::test(start_paused = true)]
async fn test_response_after_close_is_discarded() {
    let h = open().await;
    h.backend.set_latency(Duration::from_millis(500));

    let (result, ()) = tokio::join!(
        h.session.create_card(10, "Late".to_string(), CardPatch::default()),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            h.session.close();
        }
    );

    assert!(matches!(result, Err(SyncError::TornDown)));
    // The optimistic copy was never confirmed.
    let ids = card_ids(&h.session, 10);
    assert_eq!(ids.len(), 2);
    assert!(ids[1] < 0);

    h.session.close();
    let again = h.session.update_card(11, CardPatch::default()).await;
    assert!(matches!(again, Err(SyncError::TornDown)));
}

#[tokio::test(start_paused = true)]
async fn test_completing_sprint_returns_unfinished_cards_to_backlog() {
    let h = open().await;

    let sprint = h.session.complete_sprint(7).await.unwrap();

    assert_eq!(sprint.status, SprintStatus::Completed);
    let (open_ref, done_ref) = h
        .session
        .read(|s| {
            (
                s.cards.get(11).and_then(|c| c.sprint_id),
                s.cards.get(12).and_then(|c| c.sprint_id),
            )
        })
        .unwrap();
    assert_eq!(open_ref, None);
    assert_eq!(done_ref, Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_second_active_sprint_is_rejected_locally() {
    let h = open().await;

    let err = h.session.start_sprint(8).await.unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    let status = h
        .session
        .read(|s| s.sprints.get(8).map(|sprint| sprint.status))
        .unwrap();
    assert_eq!(status, Some(SprintStatus::Planned));
}

#[tokio::test(start_paused = true)]
async fn test_assign_cards_to_sprint() {
    let h = open().await;
    h.session.create_sprint("Next".to_string(), SprintPatch::default()).await.unwrap();

    let saved = h.session.assign_cards(8, &[11]).await.unwrap();

    assert_eq!(saved[0].sprint_id, Some(8));
    assert_eq!(h.backend.stored_card(11).unwrap().sprint_id, Some(8));

    let back = h.session.remove_card_from_sprint(11).await.unwrap();
    assert_eq!(back.sprint_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_unauthorized_expires_and_closes_session() {
    let h = open_with(None).await;
    h.backend.fail_next(SyncError::Unauthorized);

    let err = h
        .session
        .update_card(11, CardPatch::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SessionExpired));
    assert!(h.session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_once_is_retried_transparently() {
    let h = open().await;
    h.backend.fail_next(SyncError::Unauthorized);

    let card = h
        .session
        .update_card(
            11,
            CardPatch {
                title: Some("Retried".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(card.title, "Retried");
    assert!(!h.session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_move_renumbers_crowded_column() {
    let h = open().await;
    let tight = 1024.0_f64;
    let next = f64::from_bits(tight.to_bits() + 1);
    h.backend.edit(|data| {
        data.cards = vec![
            Card::new(31, 10, "A".to_string(), tight),
            Card::new(32, 10, "B".to_string(), next),
            Card::new(33, 20, "C".to_string(), 1024.0),
        ];
    });
    h.session.reload().await.unwrap();

    let moved = h.session.move_card(33, 10, 1).await.unwrap();

    assert_eq!(card_ids(&h.session, 10), vec![31, 33, 32]);
    assert_eq!(moved.position, 1536.0);
    assert_eq!(h.backend.stored_card(32).unwrap().position, 2048.0);
}

#[tokio::test(start_paused = true)]
async fn test_avatar_cache_and_invalidate() {
    let h = open().await;

    assert_eq!(h.session.avatar(5).await.unwrap(), vec![5]);
    assert_eq!(h.session.avatar(5).await.unwrap(), vec![5]);
    assert_eq!(h.backend.avatar_fetches.load(Ordering::SeqCst), 1);

    assert!(h.session.invalidate_avatar(5));
    h.session.avatar(5).await.unwrap();
    assert_eq!(h.backend.avatar_fetches.load(Ordering::SeqCst), 2);

    h.session.clear_avatars();
    assert!(!h.session.invalidate_avatar(5));
}

#[tokio::test(start_paused = true)]
async fn test_view_settings_are_session_owned() {
    let h = open().await;

    h.session.set_view_mode(kanban_sync_core::ViewMode::List);
    h.session.toggle_panel("activity");

    let view = h.session.view_settings();
    assert_eq!(view.mode, kanban_sync_core::ViewMode::List);
    assert!(view.is_collapsed("activity"));
}

#[tokio::test(start_paused = true)]
async fn test_events_dropped_during_open_are_recovered_by_reload() {
    let backend = FakeBackend::new(seed());
    backend.set_latency(Duration::from_millis(100));
    let broker = InMemoryBroker::new();
    let config = SyncConfig {
        subscriber_buffer: 2,
        ..SyncConfig::default()
    };
    let channels = start_channels(&broker, &config);

    // The initial load takes five round trips; these cards appear on the
    // server after it has already listed the columns' cards.
    let (session, ()) = tokio::join!(
        BoardSession::open(1, services(&backend), auth(None), &channels, &config),
        async {
            tokio::time::sleep(Duration::from_millis(450)).await;
            for id in 30..35 {
                let position = 2048.0 + 1024.0 * (id - 30) as f64;
                let card = Card::new(id, 10, format!("Bulk {}", id), position);
                backend.edit(|data| data.cards.push(card));
                let event = format!(
                    r#"{{"type":"CARD_CREATED","boardId":1,"payload":{{"id":{},"columnId":10,"title":"Bulk {}","position":{}}}}}"#,
                    id, id, position
                );
                assert_eq!(broker.publish("/topic/board/1", event).await, 1);
            }
        }
    );
    let session = session.unwrap();
    let mut changes = session.changes();
    assert_eq!(card_ids(&session, 10), vec![11]);

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, SessionChange::Reloaded);
    assert_eq!(card_ids(&session, 10), vec![11, 30, 31, 32, 33, 34]);
}
