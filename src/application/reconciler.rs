//! Discovery and cleanup of temp artifacts left in namespace working areas.

use crate::application::registry::InFlightJobs;
use crate::domain::artifacts::{ArtifactKind, DanglingFile};
use crate::domain::jobs::Namespace;
use crate::error::PipelineResult;
use crate::ports::storage::MediaStore;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of [`DanglingFileReconciler::purge_orphans`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeReport {
    pub removed: Vec<DanglingFile>,
    pub kept: usize,
}

pub struct DanglingFileReconciler<'a, S> {
    store: &'a S,
}

impl<'a, S: MediaStore> DanglingFileReconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Read-only listing. A namespace that was never used is empty.
    pub async fn list_dangling(&self, namespace: &Namespace) -> PipelineResult<Vec<DanglingFile>> {
        self.store.list_artifacts(namespace).await
    }

    /// Remove every artifact of `video_id`. Cleaning an already clean id is a no-op.
    pub async fn cleanup(&self, video_id: &str, namespace: &Namespace) -> PipelineResult<usize> {
        let removed = self.store.delete_artifacts(video_id, namespace).await?;
        debug!(video_id, namespace = %namespace, removed, "Cleanup finished");
        Ok(removed)
    }

    /// Delete working files that no running job owns and that are older than `min_age`.
    ///
    /// Outputs and thumbnails are results the caller may still read, so only
    /// source copies, partial outputs and unrecognised files are purged.
    pub async fn purge_orphans(
        &self,
        namespace: &Namespace,
        in_flight: &InFlightJobs,
        min_age: Duration,
    ) -> PipelineResult<PurgeReport> {
        let now = Utc::now();
        let mut report = PurgeReport::default();

        for file in self.store.list_artifacts(namespace).await? {
            let age = (now - file.created_at).to_std().unwrap_or_default();
            let purgeable_kind = matches!(
                file.kind,
                ArtifactKind::Source | ArtifactKind::Partial | ArtifactKind::Unknown
            );
            let running = file
                .associated_video_id
                .as_deref()
                .is_some_and(|id| in_flight.contains(id));

            if !purgeable_kind || running || age < min_age {
                report.kept += 1;
                continue;
            }
            if self.store.remove_artifact(namespace, &file.path).await? {
                report.removed.push(file);
            }
        }

        if !report.removed.is_empty() {
            info!(
                namespace = %namespace,
                removed = report.removed.len(),
                kept = report.kept,
                "Purged orphaned artifacts"
            );
        }
        Ok(report)
    }
}
