use std::{collections::HashMap, fs};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub board_document: String,
    pub content_base_url: Option<String>,
    pub passcode: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            board_document: "workspace/board".into(),
            content_base_url: None,
            passcode: None,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("desktop.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("board_document") {
                settings.board_document = v.clone();
            }
            if let Some(v) = file_cfg.get("content_base_url") {
                settings.content_base_url = Some(v.clone());
            }
            if let Some(v) = file_cfg.get("passcode") {
                settings.passcode = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Ok(v) = std::env::var("BOARD_DOCUMENT") {
        settings.board_document = v;
    }
    if let Ok(v) = std::env::var("APP__BOARD_DOCUMENT") {
        settings.board_document = v;
    }

    if let Ok(v) = std::env::var("CONTENT_BASE_URL") {
        settings.content_base_url = Some(v);
    }
    if let Ok(v) = std::env::var("APP__CONTENT_BASE_URL") {
        settings.content_base_url = Some(v);
    }

    if let Ok(v) = std::env::var("BOARD_PASSCODE") {
        settings.passcode = Some(v);
    }
    if let Ok(v) = std::env::var("APP__BOARD_PASSCODE") {
        settings.passcode = Some(v);
    }

    settings
}

/// Content lives next to the board server unless pointed elsewhere.
pub fn content_base_url(settings: &Settings) -> String {
    settings
        .content_base_url
        .clone()
        .unwrap_or_else(|| settings.server_url.clone())
}
