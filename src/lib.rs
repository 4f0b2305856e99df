//! capsule-media - Video ingestion and transcoding pipeline
//!
//! Hexagonal Architecture:
//! - domain/: Pure types and math (jobs, probe/progress parsing, artifact naming)
//! - ports/: Trait definitions (media store, transcoder, repository, event sink)
//! - adapters/: Concrete implementations (FFmpeg CLI, filesystem, Redis, HTTP)
//! - application/: Generic services (orchestrator, reconciler, in-flight registry)
//! - config: Environment configuration
//!
//! # Features
//! - `local`: Local/monolith deployment (filesystem store, Redis repository, HTTP host)

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use application::orchestrator::{ProcessingSettings, VideoProcessingService};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};

#[cfg(feature = "local")]
pub use config::LocalConfig;
