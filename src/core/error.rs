use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftguardError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Lock held: {0}")]
    LockHeld(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
}
