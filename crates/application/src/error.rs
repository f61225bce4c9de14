use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("unauthorized")]
    Unauthorized,
}
