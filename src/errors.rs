use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PassError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(passrelay::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(passrelay::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(passrelay::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(passrelay::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Not found: {0}")]
    #[diagnostic(code(passrelay::not_found))]
    NotFound(String),

    #[error("Unauthorized")]
    #[diagnostic(code(passrelay::unauthorized))]
    Unauthorized,

    #[error("Conflict: {0}")]
    #[diagnostic(code(passrelay::conflict))]
    Conflict(String),

    #[error("Transport error: {0}")]
    #[diagnostic(code(passrelay::transport))]
    Transport(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(passrelay::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(passrelay::other))]
    Other(String),
}

impl From<reqwest::Error> for PassError {
    fn from(value: reqwest::Error) -> Self {
        PassError::Transport(value.to_string())
    }
}
