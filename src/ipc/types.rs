use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::import::ImportSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    /// One import at a time; replaced wholesale by each step.
    pub import: ImportSession,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            config: Config::default(),
            import: ImportSession::default(),
        }
    }
}
