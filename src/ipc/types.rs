use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::FinalizePolicy;
use crate::session::Session;

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
    /// Open marking sessions by id. They belong to this process only.
    pub sessions: HashMap<String, Session>,
    pub finalize_policy: FinalizePolicy,
}

impl AppState {
    pub fn new(finalize_policy: FinalizePolicy) -> Self {
        Self {
            workspace: None,
            db: None,
            sessions: HashMap::new(),
            finalize_policy,
        }
    }
}
