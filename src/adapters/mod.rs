//! Adapters - Concrete implementations of ports.

pub mod ffmpeg;
pub mod memory;

#[cfg(feature = "local")]
pub mod local;
