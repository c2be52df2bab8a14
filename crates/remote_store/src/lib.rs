use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use shared::{domain::DocumentKey, error::ErrorCode, protocol::StoreEvent};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

mod http;

pub use http::HttpStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport failure: {0}")]
    Transport(String),
    #[error("store rejected the request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("store returned status {0}")]
    Status(u16),
    #[error("invalid store payload: {0}")]
    Decode(String),
    #[error("remote store is unavailable")]
    Unavailable,
    #[error("invalid store url: {0}")]
    InvalidUrl(String),
}

/// The document store contract the client cores depend on: whole-document
/// get/set plus a push channel of document updates. Every write is echoed to
/// all subscribers, including the writer.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError>;
    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-process store used by tests and offline runs. Mirrors the remote
/// contract exactly, echo included.
pub struct MemoryStore {
    documents: RwLock<HashMap<DocumentKey, Value>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            documents: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert(key.clone(), value.clone());
        let _ = self.events.send(StoreEvent::DocumentUpdated {
            key: key.clone(),
            value,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Null-object store for contexts where no backend has been wired yet; every
/// call fails and the subscription never yields.
pub struct UnavailableStore {
    events: broadcast::Sender<StoreEvent>,
}

impl UnavailableStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

impl Default for UnavailableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for UnavailableStore {
    async fn get_document(&self, _key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn set_document(&self, _key: &DocumentKey, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
