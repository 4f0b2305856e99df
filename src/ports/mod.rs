//! Ports - Trait definitions consumed by the application layer.

pub mod events;
pub mod repository;
pub mod storage;
pub mod transcoder;
