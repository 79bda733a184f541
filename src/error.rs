use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("OPENAI_API_KEY is not set; add it to the environment or a .env file")]
    MissingCredential,
    #[error("data file not found: {}", .0.display())]
    DataFileMissing(PathBuf),
    #[error("expected a '{0}' column in the feedback file")]
    MissingColumn(String),
    #[error("no source documents were loaded; check the configured document paths")]
    NoDocumentsLoaded,
    #[error("course index at {} is incomplete", .0.display())]
    IncompleteIndex(PathBuf),
    #[error("failed to read document {}: {message}", .path.display())]
    Document { path: PathBuf, message: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("completion model returned an empty response")]
    EmptyResponse,
    #[error("embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("index migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
