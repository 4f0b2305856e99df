//! Audio/Video metadata and encoder output parsing.

pub mod probe;
pub mod progress;
