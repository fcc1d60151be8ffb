use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("camera is unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to load from the database: {0}")]
    LoadFailed(String),
    #[error("failed to save to the database: {0}")]
    SaveFailed(String),
    #[error("no questions available")]
    NoQuestions,
    #[error("question `{key}` is malformed: {reason}")]
    MalformedQuestion { key: String, reason: String },
    #[error("question {0} has already been answered")]
    AlreadyAnswered(usize),
    #[error("`{action}` is not allowed while {state}")]
    InvalidTransition {
        action: &'static str,
        state: String,
    },
    #[error("invalid question: {0}")]
    InvalidQuestion(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot encode or decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wraps any failure into `LoadFailed`, keeping its message.
    pub fn load_failed(cause: impl std::fmt::Display) -> Self {
        Error::LoadFailed(cause.to_string())
    }

    /// Like [`load_failed`](Self::load_failed), but a `LoadFailed` passes
    /// through as is.
    pub fn into_load_failed(self) -> Self {
        match self {
            Error::LoadFailed(_) => self,
            other => Error::load_failed(other),
        }
    }

    pub fn save_failed(cause: impl std::fmt::Display) -> Self {
        Error::SaveFailed(cause.to_string())
    }
}
