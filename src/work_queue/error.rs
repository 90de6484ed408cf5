//! Work queue error types.

use thiserror::Error;

use crate::models::PayloadError;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Unknown job type '{0}': not configured")]
    UnknownJobType(String),
    #[error("Handler setup failed for '{job_type}': {message}")]
    HandlerSetup { job_type: String, message: String },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Store unavailable after {attempts} consecutive failures: {last_error}")]
    StoreUnavailable { attempts: u32, last_error: String },
    #[error("{0}")]
    Other(String),
}
