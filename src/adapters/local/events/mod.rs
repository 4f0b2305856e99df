//! In-process fan-out of processing events.

pub mod hub;

pub use hub::EventHub;
