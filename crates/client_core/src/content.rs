use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::ContentId;
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("content '{0}' not found")]
    NotFound(ContentId),
    #[error("content source returned status {0}")]
    Status(u16),
    #[error("content transport failure: {0}")]
    Transport(String),
    #[error("invalid content payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, id: &ContentId) -> Result<ContentPayload, FetchError>;
}

pub struct HttpContentSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpContentSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self, id: &ContentId) -> Result<ContentPayload, FetchError> {
        let response = self
            .http
            .get(format!("{}/content/{}", self.base_url, id.0))
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(id.clone()));
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|err| FetchError::Decode(err.to_string()))
    }
}

/// Session-scoped content cache, constructed explicitly and injected into the
/// controllers that share it. One entry per identifier; entries are immutable
/// once written and live until `clear` or the end of the session.
pub struct ContentCache {
    entries: RwLock<HashMap<ContentId, Arc<ContentPayload>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &ContentId) -> Option<Arc<ContentPayload>> {
        self.entries.read().await.get(id).cloned()
    }

    // First writer wins; a racing duplicate fetch cannot replace an entry.
    pub async fn insert(&self, id: ContentId, payload: ContentPayload) -> Arc<ContentPayload> {
        let mut entries = self.entries.write().await;
        entries
            .entry(id)
            .or_insert_with(|| Arc::new(payload))
            .clone()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new()
    }
}

/// What the presentation layer renders: loading and error are queryable
/// states, never exceptions.
#[derive(Debug, Clone, Default)]
pub struct ContentView {
    pub content: Option<Arc<ContentPayload>>,
    pub is_loading: bool,
    pub error: Option<FetchError>,
}

#[derive(Debug, Clone)]
pub enum ContentEvent {
    /// The payload for `id` is now cached (view fetch or prefetch).
    Loaded { id: ContentId },
    /// The fetch for the currently requested identifier failed.
    Failed { id: ContentId, error: FetchError },
}

enum FetchPhase {
    Idle,
    Loading,
    Ready(Arc<ContentPayload>),
    Failed(FetchError),
}

impl FetchPhase {
    fn view(&self) -> ContentView {
        match self {
            FetchPhase::Idle => ContentView::default(),
            FetchPhase::Loading => ContentView {
                content: None,
                is_loading: true,
                error: None,
            },
            FetchPhase::Ready(payload) => ContentView {
                content: Some(Arc::clone(payload)),
                is_loading: false,
                error: None,
            },
            FetchPhase::Failed(error) => ContentView {
                content: None,
                is_loading: false,
                error: Some(error.clone()),
            },
        }
    }
}

struct ActiveFetch {
    id: ContentId,
    task: JoinHandle<()>,
}

struct ControllerState {
    current: Option<ContentId>,
    phase: FetchPhase,
    active: Option<ActiveFetch>,
    inflight: HashSet<ContentId>,
}

/// Resolves the currently requested identifier to content. At most one fetch
/// runs per identifier; changing the requested identifier aborts the stale
/// view fetch, and anything that still settles afterwards is checked against
/// the current identifier before it may touch the view.
pub struct ContentController {
    cache: Arc<ContentCache>,
    source: Arc<dyn ContentSource>,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ContentEvent>,
}

impl ContentController {
    pub fn new(cache: Arc<ContentCache>, source: Arc<dyn ContentSource>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            cache,
            source,
            inner: Mutex::new(ControllerState {
                current: None,
                phase: FetchPhase::Idle,
                active: None,
                inflight: HashSet::new(),
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ContentEvent> {
        self.events.subscribe()
    }

    /// Points the view at `identifier` and returns the resulting state:
    /// idle for none, the cached payload on a hit, or loading with a fetch
    /// underway.
    pub async fn request(self: &Arc<Self>, identifier: Option<ContentId>) -> ContentView {
        let mut state = self.inner.lock().await;

        if state.current != identifier {
            if let Some(active) = state.active.take() {
                active.task.abort();
                state.inflight.remove(&active.id);
            }
        }
        state.current = identifier.clone();

        let Some(id) = identifier else {
            state.phase = FetchPhase::Idle;
            return state.phase.view();
        };

        if let Some(payload) = self.cache.get(&id).await {
            state.phase = FetchPhase::Ready(payload);
            return state.phase.view();
        }

        state.phase = FetchPhase::Loading;
        if state.inflight.insert(id.clone()) {
            let task = self.spawn_fetch(id.clone());
            state.active = Some(ActiveFetch { id, task });
        }
        state.phase.view()
    }

    /// Best-effort cache warm-up ahead of navigation. Shares in-flight
    /// fetches with `request`; failures are swallowed.
    pub async fn prefetch(self: &Arc<Self>, id: ContentId) {
        if self.cache.get(&id).await.is_some() {
            return;
        }
        let mut state = self.inner.lock().await;
        if state.inflight.insert(id.clone()) {
            self.spawn_fetch(id);
        }
    }

    /// Empties the cache. In-flight fetches are unaffected and settle under
    /// the usual rules.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn snapshot(&self) -> ContentView {
        self.inner.lock().await.phase.view()
    }

    fn spawn_fetch(self: &Arc<Self>, id: ContentId) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let result = controller.source.fetch(&id).await;
            controller.settle_fetch(id, result).await;
        })
    }

    // Shared completion path for view fetches and prefetches. Successes warm
    // the cache unconditionally (entries are per-identifier immutable); only
    // a settlement for the still-current identifier may change the view.
    async fn settle_fetch(&self, id: ContentId, result: Result<ContentPayload, FetchError>) {
        let cached = match result {
            Ok(payload) => Ok(self.cache.insert(id.clone(), payload).await),
            Err(error) => Err(error),
        };

        let mut state = self.inner.lock().await;
        state.inflight.remove(&id);
        if state.active.as_ref().is_some_and(|active| active.id == id) {
            state.active = None;
        }
        let is_current = state.current.as_ref() == Some(&id);

        match cached {
            Ok(_) if !is_current => {
                drop(state);
                let _ = self.events.send(ContentEvent::Loaded { id });
            }
            Ok(payload) => {
                state.phase = FetchPhase::Ready(payload);
                drop(state);
                let _ = self.events.send(ContentEvent::Loaded { id });
            }
            Err(error) if !is_current => {
                info!(content_id = %id, "content: background fetch failed: {error}");
            }
            Err(error) => {
                warn!(content_id = %id, "content: fetch failed: {error}");
                state.phase = FetchPhase::Failed(error.clone());
                drop(state);
                let _ = self.events.send(ContentEvent::Failed { id, error });
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/content_tests.rs"]
mod tests;
