use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use shared::{domain::DocumentKey, error::ApiError, protocol::StoreEvent};
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

use crate::{RemoteStore, StoreError};

const FEED_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// HTTP-backed remote store: documents live at `/documents/{key}`, and the
/// server pushes `StoreEvent` frames over a websocket at `/ws`. The feed task
/// reconnects after a fixed delay whenever the stream ends, so a transient
/// disconnect degrades delivery without losing the subscription.
#[derive(Debug)]
pub struct HttpStore {
    http: Client,
    base_url: String,
    ws_url: String,
    events: broadcast::Sender<StoreEvent>,
}

impl HttpStore {
    pub fn connect(server_url: &str) -> Result<Arc<Self>, StoreError> {
        let base_url = normalize_base_url(server_url)?;
        let ws_url = derive_ws_url(&base_url);
        let (events, _) = broadcast::channel(256);
        let store = Arc::new(Self {
            http: Client::new(),
            base_url,
            ws_url,
            events,
        });
        store.spawn_event_feed();
        Ok(store)
    }

    fn spawn_event_feed(self: &Arc<Self>) {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                // The feed outlives nothing: once every handle to the store
                // is gone, stop reconnecting.
                let Some(strong) = store.upgrade() else { return };
                let ws_url = strong.ws_url.clone();
                let events = strong.events.clone();
                drop(strong);

                match connect_async(&ws_url).await {
                    Ok((stream, _)) => {
                        info!("store: event feed connected");
                        let (_, mut reader) = stream.split();
                        while let Some(message) = reader.next().await {
                            match message {
                                Ok(Message::Text(text)) => {
                                    match serde_json::from_str::<StoreEvent>(&text) {
                                        Ok(event) => {
                                            let _ = events.send(event);
                                        }
                                        Err(err) => {
                                            warn!("store: invalid event payload: {err}");
                                        }
                                    }
                                }
                                Ok(Message::Close(_)) => break,
                                Ok(_) => {}
                                Err(err) => {
                                    warn!("store: event feed receive failed: {err}");
                                    break;
                                }
                            }
                        }
                        warn!("store: event feed disconnected");
                    }
                    Err(err) => warn!("store: event feed connect failed: {err}"),
                }

                if store.upgrade().is_none() {
                    return;
                }
                tokio::time::sleep(FEED_RECONNECT_DELAY).await;
            }
        });
    }

    fn document_url(&self, key: &DocumentKey) -> String {
        format!("{}/documents/{}", self.base_url, key.0)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn get_document(&self, key: &DocumentKey) -> Result<Option<Value>, StoreError> {
        let response = self
            .http
            .get(self.document_url(key))
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let value = response
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(Some(value))
    }

    async fn set_document(&self, key: &DocumentKey, value: Value) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.document_url(key))
            .json(&value)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if let Ok(body) = response.json::<ApiError>().await {
        return Err(StoreError::Rejected {
            code: body.code,
            message: body.message,
        });
    }
    Err(StoreError::Status(status.as_u16()))
}

fn normalize_base_url(server_url: &str) -> Result<String, StoreError> {
    let url = Url::parse(server_url).map_err(|err| StoreError::InvalidUrl(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(server_url.trim_end_matches('/').to_string()),
        other => Err(StoreError::InvalidUrl(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

fn derive_ws_url(base_url: &str) -> String {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else {
        base_url.replacen("http://", "ws://", 1)
    };
    format!("{ws_base}/ws")
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
