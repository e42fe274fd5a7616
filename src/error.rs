use thiserror::Error;

#[derive(Error, Debug)]
pub enum SaccoError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input out of bounds or malformed. No state was changed.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Operation attempted from the wrong lifecycle state.
    #[error("Not allowed in current state: {0}")]
    State(String),

    /// Duplicate or conflicting write; the existing state is preserved.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, SaccoError>;

/// Map a UNIQUE constraint violation to `Conflict`, leaving other database
/// errors untouched.
pub fn conflict_on_unique(err: rusqlite::Error, what: impl Into<String>) -> SaccoError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SaccoError::Conflict(what.into())
        }
        _ => SaccoError::Db(err),
    }
}
