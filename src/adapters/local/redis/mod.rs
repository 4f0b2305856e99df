//! Redis-backed [`ProcessingRepository`](crate::ports::repository::ProcessingRepository).
//!
//! Each video is a hash `capsule:<namespace>:video:<id>`; ids not yet processed
//! are also members of the set `capsule:<namespace>:pending`.

mod error;
mod pool;
mod repository;

pub use error::RepositoryError;
pub use pool::RedisPool;
pub use repository::RedisRepository;

/// Redis key constants
const KEY_PREFIX: &str = "capsule";
const FIELD_SOURCE: &str = "source";
const FIELD_IS_PROCESSED: &str = "is_processed";
const FIELD_PROGRESS: &str = "processing_progress";
const FIELD_ERROR: &str = "processing_error";
