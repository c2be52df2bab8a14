use std::{collections::BTreeSet, sync::Arc};

use remote_store::{RemoteStore, StoreError};
use serde_json::Value;
use shared::{
    domain::{Board, BoardError, Column, DocumentKey, TaskId, TaskItem},
    protocol::{BoardDocument, StoreEvent},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("failed to read board document: {0}")]
    Load(#[source] StoreError),
    #[error("invalid board document: {0}")]
    Decode(String),
    #[error("failed to persist board document: {0}")]
    Persist(#[source] StoreError),
}

#[derive(Debug, Clone)]
pub enum BoardEvent {
    Updated(Board),
    PersistFailed { message: String },
}

struct BoardSyncState {
    /// What the UI renders; may run ahead of the store while a persist is in
    /// flight.
    render: Board,
    /// Last snapshot the store acknowledged or pushed; the rollback target.
    last_synced: Board,
}

/// Keeps a locally rendered board responsive to drag gestures and eventually
/// consistent with the remote document. Mutations apply to `render` first,
/// then persist the whole document; the merge loop folds pushed snapshots
/// back in and never writes, so an echoed own-write cannot amplify.
pub struct BoardSync {
    store: Arc<dyn RemoteStore>,
    document_key: DocumentKey,
    inner: Mutex<BoardSyncState>,
    events: broadcast::Sender<BoardEvent>,
    merge_task: Mutex<Option<JoinHandle<()>>>,
}

impl BoardSync {
    pub fn new(store: Arc<dyn RemoteStore>, document_key: DocumentKey) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            document_key,
            inner: Mutex::new(BoardSyncState {
                render: Board::empty(),
                last_synced: Board::empty(),
            }),
            events,
            merge_task: Mutex::new(None),
        })
    }

    /// Reads the current remote document. An absent document yields the
    /// empty board; nothing is written until the first mutation.
    pub async fn load(&self) -> Result<Board, SyncError> {
        let board = match self.store.get_document(&self.document_key).await {
            Ok(Some(value)) => decode_board(value)?,
            Ok(None) => Board::empty(),
            Err(err) => return Err(SyncError::Load(err)),
        };
        let mut state = self.inner.lock().await;
        state.render = board.clone();
        state.last_synced = board.clone();
        Ok(board)
    }

    /// Spawns the single-consumer merge loop over the store's push channel.
    pub async fn start(self: &Arc<Self>) {
        let sync = Arc::clone(self);
        let mut rx = self.store.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(StoreEvent::DocumentUpdated { key, value }) => {
                        if key != sync.document_key {
                            continue;
                        }
                        match decode_board(value) {
                            Ok(board) => sync.apply_remote(board).await,
                            Err(err) => {
                                warn!("board: ignoring undecodable snapshot: {err}");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "board: subscription lagged; next snapshot resyncs");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("board: subscription channel closed");
        });
        let previous = self.merge_task.lock().await.replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub async fn stop(&self) {
        if let Some(task) = self.merge_task.lock().await.take() {
            task.abort();
        }
    }

    /// Dropping the receiver unsubscribes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn board(&self) -> Board {
        self.inner.lock().await.render.clone()
    }

    pub async fn move_task(
        &self,
        task_id: TaskId,
        target: Column,
        target_index: usize,
    ) -> Result<Board, SyncError> {
        let next = self
            .apply_local(|board| board.apply_move(task_id, target, target_index))
            .await?;
        self.persist(next).await
    }

    pub async fn add_task(
        &self,
        title: impl Into<String>,
        tags: BTreeSet<String>,
        column: Column,
    ) -> Result<TaskItem, SyncError> {
        let task = TaskItem::new(title, tags, column);
        let task_id = task.id;
        let next = self
            .apply_local(|board| board.append_task(column, task.clone()))
            .await?;
        let board = self.persist(next).await?;
        board
            .task(task_id)
            .cloned()
            .ok_or(SyncError::Board(BoardError::UnknownTask(task_id)))
    }

    pub async fn update_task(
        &self,
        task_id: TaskId,
        title: impl Into<String>,
        tags: BTreeSet<String>,
    ) -> Result<TaskItem, SyncError> {
        let title = title.into();
        let next = self
            .apply_local(|board| board.edit_task(task_id, title, tags))
            .await?;
        let board = self.persist(next).await?;
        board
            .task(task_id)
            .cloned()
            .ok_or(SyncError::Board(BoardError::UnknownTask(task_id)))
    }

    pub async fn remove_task(&self, task_id: TaskId) -> Result<(), SyncError> {
        let next = self
            .apply_local(|board| board.remove_task(task_id))
            .await?;
        self.persist(next).await?;
        Ok(())
    }

    // Applies a pure board transition optimistically and announces the new
    // render state before any remote round-trip.
    async fn apply_local(
        &self,
        transition: impl FnOnce(&Board) -> Result<Board, BoardError>,
    ) -> Result<Board, SyncError> {
        let next = {
            let mut state = self.inner.lock().await;
            let next = transition(&state.render)?;
            state.render = next.clone();
            next
        };
        let _ = self.events.send(BoardEvent::Updated(next.clone()));
        Ok(next)
    }

    async fn apply_remote(&self, board: Board) {
        let changed = {
            let mut state = self.inner.lock().await;
            let changed = state.render != board;
            state.last_synced = board.clone();
            if changed {
                state.render = board.clone();
            }
            changed
        };
        if changed {
            let _ = self.events.send(BoardEvent::Updated(board));
        }
    }

    // Sends the whole current board; last writer wins at document
    // granularity. On failure the optimistic render state rolls back to the
    // last snapshot the store acknowledged, and the failure is reported.
    async fn persist(&self, next: Board) -> Result<Board, SyncError> {
        let value = serde_json::to_value(BoardDocument::from_board(&next))
            .map_err(|err| SyncError::Decode(err.to_string()))?;
        match self.store.set_document(&self.document_key, value).await {
            Ok(()) => {
                let mut state = self.inner.lock().await;
                state.last_synced = next.clone();
                Ok(next)
            }
            Err(err) => {
                let rolled_back = {
                    let mut state = self.inner.lock().await;
                    state.render = state.last_synced.clone();
                    state.render.clone()
                };
                warn!("board: persist failed, optimistic state rolled back: {err}");
                let _ = self.events.send(BoardEvent::Updated(rolled_back));
                let _ = self.events.send(BoardEvent::PersistFailed {
                    message: err.to_string(),
                });
                Err(SyncError::Persist(err))
            }
        }
    }
}

fn decode_board(value: Value) -> Result<Board, SyncError> {
    let document: BoardDocument =
        serde_json::from_value(value).map_err(|err| SyncError::Decode(err.to_string()))?;
    document.into_board().map_err(SyncError::Board)
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
