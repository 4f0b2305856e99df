use crate::domain::artifacts::DanglingFile;
use crate::domain::jobs::{Namespace, SourceHandle};
use crate::error::PipelineResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Physical storage of inputs, outputs and temp artifacts.
///
/// Every artifact of a video lives in the working area of its namespace and is
/// named after the video id, so concurrent jobs for different ids never collide.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Produce a local file the transcoder can read, whatever the handle type.
    async fn materialize_local_copy(
        &self,
        video_id: &str,
        source: &SourceHandle,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf>;

    /// Staged destination for a transcoded output, invisible to
    /// [`get_processed_file`](MediaStore::get_processed_file) until promoted.
    async fn output_path(&self, video_id: &str, namespace: &Namespace) -> PipelineResult<PathBuf>;

    /// Stage an already compatible local copy as the output of the current run.
    async fn adopt_as_output(
        &self,
        video_id: &str,
        namespace: &Namespace,
        local_copy: &Path,
    ) -> PipelineResult<PathBuf>;

    /// Publish a staged output under its final name, replacing outputs of earlier runs.
    async fn promote_output(
        &self,
        video_id: &str,
        namespace: &Namespace,
        staged: &Path,
    ) -> PipelineResult<PathBuf>;

    /// Destination for the poster frame.
    async fn thumbnail_path(&self, video_id: &str, namespace: &Namespace)
        -> PipelineResult<PathBuf>;

    /// Completed output of a video, `NotFound` while none exists.
    async fn get_processed_file(
        &self,
        video_id: &str,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf>;

    /// Artifacts directly inside the namespace working area. Never mutates.
    async fn list_artifacts(&self, namespace: &Namespace) -> PipelineResult<Vec<DanglingFile>>;

    /// Delete one listed artifact. Paths outside the namespace working area are refused.
    async fn remove_artifact(&self, namespace: &Namespace, path: &Path) -> PipelineResult<bool>;

    /// Delete every artifact of `video_id` in `namespace`, returning how many went away.
    async fn delete_artifacts(&self, video_id: &str, namespace: &Namespace)
        -> PipelineResult<usize>;
}
