use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid session id '{0}': expected 8-64 characters of [A-Za-z0-9_-]")]
    InvalidSessionId(String),

    #[error("Invalid category '{0}': expected one of uploads, processing, downloads")]
    InvalidCategory(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
