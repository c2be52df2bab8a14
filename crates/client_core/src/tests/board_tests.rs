use std::time::Duration;

use async_trait::async_trait;
use remote_store::MemoryStore;
use tokio::{sync::Notify, time::timeout};

use super::*;

struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<u32>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            writes: Mutex::new(0),
        }
    }

    async fn write_count(&self) -> u32 {
        *self.writes.lock().await
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        self.inner.get_document(key).await
    }

    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError> {
        *self.writes.lock().await += 1;
        self.inner.set_document(key, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

// Writes succeed until `fail_writes` is flipped, then fail with a transport
// error.
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: Mutex<bool>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: Mutex::new(false),
        }
    }

    async fn break_writes(&self) {
        *self.fail_writes.lock().await = true;
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        self.inner.get_document(key).await
    }

    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError> {
        if *self.fail_writes.lock().await {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.set_document(key, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

struct GatedStore {
    inner: MemoryStore,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl RemoteStore for GatedStore {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        self.inner.get_document(key).await
    }

    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.set_document(key, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.subscribe()
    }
}

fn board_key() -> DocumentKey {
    DocumentKey::new("workspace/board")
}

async fn recv_board_event(rx: &mut broadcast::Receiver<BoardEvent>) -> BoardEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("event")
}

#[tokio::test]
async fn load_initializes_empty_board_when_document_is_absent() {
    let store = Arc::new(MemoryStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());

    let board = sync.load().await.expect("load");

    assert_eq!(board.task_count(), 0);
    // Absence must not trigger an initializing write.
    let stored = store.get_document(&board_key()).await.expect("get");
    assert!(stored.is_none());
}

#[tokio::test]
async fn mutations_persist_the_full_document_and_preserve_invariants() {
    let store = Arc::new(MemoryStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");

    let t1 = sync
        .add_task("write draft", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add t1");
    let t2 = sync
        .add_task("review draft", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add t2");
    sync.move_task(t1.id, Column::Done, 0).await.expect("move");
    sync.remove_task(t2.id).await.expect("remove");

    let board = sync.board().await;
    board.validate().expect("invariants");
    assert_eq!(board.task_count(), 1);

    let stored = store
        .get_document(&board_key())
        .await
        .expect("get")
        .expect("document present");
    let decoded = serde_json::from_value::<BoardDocument>(stored)
        .expect("document decodes")
        .into_board()
        .expect("board decodes");
    assert_eq!(decoded, board);
}

#[tokio::test]
async fn move_task_transfers_between_columns_at_the_target_index() {
    let store = Arc::new(MemoryStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");

    let t1 = sync
        .add_task("t1", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add t1");
    let t2 = sync
        .add_task("t2", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add t2");

    let board = sync.move_task(t1.id, Column::Done, 0).await.expect("move");

    let backlog: Vec<_> = board.tasks_in(Column::Backlog).iter().map(|t| t.id).collect();
    let done: Vec<_> = board.tasks_in(Column::Done).iter().map(|t| t.id).collect();
    assert_eq!(backlog, vec![t2.id]);
    assert_eq!(done, vec![t1.id]);
}

#[tokio::test]
async fn optimistic_state_is_visible_while_the_persist_is_still_in_flight() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");

    let pending_add = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move {
            sync.add_task("drafted", BTreeSet::new(), Column::ThisWeek)
                .await
        })
    };

    timeout(Duration::from_secs(5), entered.notified())
        .await
        .expect("persist should start");

    let board = sync.board().await;
    assert_eq!(board.tasks_in(Column::ThisWeek).len(), 1);

    release.notify_one();
    let added = pending_add.await.expect("join").expect("add settles");
    assert_eq!(added.title, "drafted");
}

#[tokio::test]
async fn failed_persist_rolls_back_to_the_last_known_good_board() {
    let store = Arc::new(FlakyStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");

    let task = sync
        .add_task("stable", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add");
    let before = sync.board().await;

    store.break_writes().await;
    let err = sync
        .move_task(task.id, Column::Done, 0)
        .await
        .expect_err("persist must fail");

    assert!(matches!(err, SyncError::Persist(_)));
    assert_eq!(sync.board().await, before);
}

#[tokio::test]
async fn rollback_is_announced_before_the_failure_returns() {
    let store = Arc::new(FlakyStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");
    store.break_writes().await;
    let mut rx = sync.subscribe_events();

    let _ = sync
        .add_task("doomed", BTreeSet::new(), Column::Backlog)
        .await
        .expect_err("persist must fail");

    // Optimistic apply, rollback, then the failure notice.
    match recv_board_event(&mut rx).await {
        BoardEvent::Updated(board) => assert_eq!(board.task_count(), 1),
        other => panic!("unexpected event: {other:?}"),
    }
    match recv_board_event(&mut rx).await {
        BoardEvent::Updated(board) => assert_eq!(board.task_count(), 0),
        other => panic!("unexpected event: {other:?}"),
    }
    match recv_board_event(&mut rx).await {
        BoardEvent::PersistFailed { message } => {
            assert!(message.contains("connection reset"), "got: {message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn own_echo_never_triggers_another_write() {
    let store = Arc::new(RecordingStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");
    sync.start().await;
    let mut store_rx = store.subscribe();

    sync.add_task("once", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add");

    // Wait until the echo of our own write has been broadcast, give the
    // merge loop a moment to fold it in, then confirm nothing wrote again.
    timeout(Duration::from_secs(5), store_rx.recv())
        .await
        .expect("echo within deadline")
        .expect("echo");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.write_count().await, 1);

    // A pushed snapshot identical to the local state must also not write.
    let current = store
        .get_document(&board_key())
        .await
        .expect("get")
        .expect("document");
    store
        .set_document(&board_key(), current)
        .await
        .expect("external push");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.write_count().await, 2);

    sync.stop().await;
}

#[tokio::test]
async fn remote_snapshot_from_another_client_is_applied() {
    let store = Arc::new(MemoryStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");
    sync.start().await;
    let mut rx = sync.subscribe_events();

    let remote_board = Board::empty()
        .append_task(
            Column::Done,
            TaskItem::new("landed elsewhere", BTreeSet::new(), Column::Done),
        )
        .expect("append");
    let value =
        serde_json::to_value(BoardDocument::from_board(&remote_board)).expect("encode");
    store
        .set_document(&board_key(), value)
        .await
        .expect("external write");

    match recv_board_event(&mut rx).await {
        BoardEvent::Updated(board) => assert_eq!(board, remote_board),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(sync.board().await, remote_board);

    sync.stop().await;
}

#[tokio::test]
async fn update_task_edits_title_and_tags_and_persists() {
    let store = Arc::new(MemoryStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");

    let task = sync
        .add_task("draft", BTreeSet::new(), Column::Backlog)
        .await
        .expect("add");
    let tags: BTreeSet<_> = ["kanban".to_string()].into();

    let updated = sync
        .update_task(task.id, "draft, expanded", tags.clone())
        .await
        .expect("update");

    assert_eq!(updated.title, "draft, expanded");
    assert_eq!(updated.tags, tags);

    let stored = store
        .get_document(&board_key())
        .await
        .expect("get")
        .expect("document");
    let decoded = serde_json::from_value::<BoardDocument>(stored)
        .expect("decodes")
        .into_board()
        .expect("board");
    assert_eq!(decoded.task(task.id).expect("task").title, "draft, expanded");
}

#[tokio::test]
async fn mutating_an_unknown_task_is_rejected_without_a_write() {
    let store = Arc::new(RecordingStore::new());
    let sync = BoardSync::new(Arc::clone(&store) as Arc<dyn RemoteStore>, board_key());
    sync.load().await.expect("load");
    let ghost = TaskId::generate();

    let err = sync
        .move_task(ghost, Column::Done, 0)
        .await
        .expect_err("must be rejected");

    assert!(matches!(
        err,
        SyncError::Board(BoardError::UnknownTask(_))
    ));
    assert_eq!(store.write_count().await, 0);
}
