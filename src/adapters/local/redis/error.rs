//! Redis error types for the local adapter.

use crate::error::PipelineError;
use deadpool_redis::CreatePoolError;
use thiserror::Error;

pub type RedisError = deadpool_redis::redis::RedisError;
pub type PoolError = deadpool_redis::PoolError;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Create pool error: {0}")]
    CreatePool(String),
}

impl From<CreatePoolError> for RepositoryError {
    fn from(err: CreatePoolError) -> Self {
        RepositoryError::CreatePool(format!("{}", err))
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        PipelineError::repository(err.to_string())
    }
}
