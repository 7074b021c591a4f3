//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Database error: {0}")]
    Database(#[from] expiry_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] expiry_storage::StorageError),
}
