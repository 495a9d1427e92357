//! Error type shared by the planner library.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlannerError>;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("gazetteer error: {0}")]
    Gazetteer(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid routing problem: {0}")]
    InvalidProblem(String),
}
