use std::path::PathBuf;

use crate::grading::GradingScale;
use rusqlite::Connection;
use serde::Deserialize;

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
    /// Scale in effect for new marks; reloaded whenever the workspace or its
    /// grading settings change.
    pub grading: GradingScale,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            grading: GradingScale::default(),
        }
    }
}
