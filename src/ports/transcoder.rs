use crate::domain::av::probe::ProbeResult;
use crate::error::PipelineResult;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Progress callback of the encoder, percentage in [0, 100].
///
/// Successive values are not guaranteed to increase.
pub type EncodeProgressFn = dyn Fn(f64) + Send + Sync;

/// External codec tool.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Read-only inspection of a media file.
    async fn probe(&self, input: &Path) -> PipelineResult<ProbeResult>;

    /// Re-encode `input` into the standard codec at `output`.
    ///
    /// Must kill the encoder and leave nothing at `output` when `cancel` fires,
    /// reporting `PipelineError::Aborted`.
    async fn transcode_to_standard_codec(
        &self,
        input: &Path,
        output: &Path,
        on_progress: &EncodeProgressFn,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;

    /// Extract a single poster frame at `at_seconds`.
    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;
}
