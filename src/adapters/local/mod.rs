//! Local adapters for monolith deployment.

pub mod events;
pub mod fs;
pub mod http;
pub mod redis;

pub use events::EventHub;
pub use fs::FsMediaStore;
pub use redis::{RedisPool, RedisRepository};
