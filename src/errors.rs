use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("key already exists: {0}")]
    DuplicateKey(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("value serialization error: {0}")]
    ValueSerializationError(String),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("database closed")]
    DatabaseClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;
