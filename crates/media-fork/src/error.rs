//! Error types for the media fork manager.

use thiserror::Error;

pub type ForkResult<T> = Result<T, ForkError>;

#[derive(Error, Debug, Clone)]
pub enum ForkError {
    #[error("no consumer registered with id {0}")]
    UnknownConsumer(String),

    #[error("consumer {0} is already registered")]
    DuplicateConsumer(String),
}
