use domain::DomainError;
use thiserror::Error;

use crate::media::MediaError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("image upload failed: {0}")]
    UploadFailed(#[source] MediaError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not allowed: {0}")]
    Unauthorized(String),
    #[error("vote state unavailable: {0}")]
    VoteStateUnavailable(String),
}

impl ApplicationError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApplicationError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApplicationError::Unauthorized(message.into())
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
