//! Redis connection pool.

use super::error::RepositoryError;
use deadpool_redis::{Config, Connection, Pool, Runtime};

#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    /// Create the pool. No connection is opened until first use.
    pub fn new(redis_url: &str) -> Result<Self, RepositoryError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    pub(super) async fn get(&self) -> Result<Connection, RepositoryError> {
        Ok(self.pool.get().await?)
    }
}
