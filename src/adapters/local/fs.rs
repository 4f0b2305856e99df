use crate::domain::artifacts::{
    belongs_to, classify, source_file_name, staged_output_file_name, thumbnail_file_name,
    ArtifactKind, DanglingFile, PARTIAL_SUFFIX, STAGED_SUFFIX,
};
use crate::domain::jobs::{validate_object_key, validate_video_id, Namespace, SourceHandle};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::storage::MediaStore;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

/// Extension used for working copies whose name carries none.
const FALLBACK_EXTENSION: &str = "media";

/// Local-disk media store.
///
/// Namespace working areas live under `work_dir`, `SourceHandle::Object` keys
/// resolve below `objects_dir`.
#[derive(Clone, Debug)]
pub struct FsMediaStore {
    work_dir: PathBuf,
    objects_dir: PathBuf,
}

impl FsMediaStore {
    pub fn new(work_dir: impl Into<PathBuf>, objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            objects_dir: objects_dir.into(),
        }
    }

    pub fn namespace_dir(&self, namespace: &Namespace) -> PathBuf {
        namespace.dir_under(&self.work_dir)
    }

    pub fn object_path(&self, key: &str) -> PipelineResult<PathBuf> {
        validate_object_key(key)?;
        Ok(self.objects_dir.join(key))
    }

    /// Persist an upload stream as an object, returning the number of bytes written.
    pub async fn put_object_stream<S, E>(&self, key: &str, stream: S) -> PipelineResult<u64>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = with_part_suffix(&path);

        let written = async {
            let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
            let body_reader = StreamReader::new(body_with_io_error);
            futures::pin_mut!(body_reader);

            let mut file = BufWriter::new(File::create(&part).await?);
            let written = tokio::io::copy(&mut body_reader, &mut file).await?;
            file.flush().await?;
            Ok::<_, io::Error>(written)
        }
        .await;

        match written {
            Ok(written) => {
                fs::rename(&part, &path).await?;
                info!(key, bytes = written, "Stored object");
                Ok(written)
            }
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                Err(e.into())
            }
        }
    }

    async fn ensure_namespace_dir(&self, namespace: &Namespace) -> PipelineResult<PathBuf> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Regular files directly inside the namespace directory. A missing directory is empty.
    async fn namespace_files(&self, namespace: &Namespace) -> PipelineResult<Vec<(PathBuf, String)>> {
        let dir = self.namespace_dir(namespace);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // child namespaces are directories and stay invisible
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push((entry.path(), name.to_string()));
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn materialize_local_copy(
        &self,
        video_id: &str,
        source: &SourceHandle,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let dir = self.ensure_namespace_dir(namespace).await?;
        let ext = source
            .extension()
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let dest = dir.join(source_file_name(video_id, &ext));
        let part = with_part_suffix(&dest);

        let copied = match source {
            SourceHandle::Local(path) => copy_source(path, &part).await,
            SourceHandle::Object { key } => copy_source(&self.object_path(key)?, &part).await,
            SourceHandle::Memory { bytes, .. } => fs::write(&part, bytes).await.map_err(Into::into),
        };
        if let Err(e) = copied {
            let _ = fs::remove_file(&part).await;
            return Err(e);
        }

        fs::rename(&part, &dest).await?;
        debug!(video_id, path = %dest.display(), "Materialized local copy");
        Ok(dest)
    }

    async fn output_path(&self, video_id: &str, namespace: &Namespace) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let dir = self.ensure_namespace_dir(namespace).await?;
        Ok(dir.join(staged_output_file_name(video_id, "mp4")))
    }

    async fn adopt_as_output(
        &self,
        video_id: &str,
        namespace: &Namespace,
        local_copy: &Path,
    ) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let dir = self.ensure_namespace_dir(namespace).await?;
        let ext = local_copy
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(FALLBACK_EXTENSION);
        let dest = dir.join(staged_output_file_name(video_id, ext));
        fs::rename(local_copy, &dest).await?;
        Ok(dest)
    }

    async fn promote_output(
        &self,
        video_id: &str,
        namespace: &Namespace,
        staged: &Path,
    ) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let dir = self.namespace_dir(namespace);
        let suffix = format!(".{}", STAGED_SUFFIX);
        let final_name = staged
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(suffix.as_str()))
            .filter(|name| classify(name) == (Some(video_id.to_string()), ArtifactKind::Output))
            .filter(|_| staged.parent() == Some(dir.as_path()))
            .ok_or_else(|| {
                PipelineError::invalid_input(format!(
                    "{} is not a staged output of video {}",
                    staged.display(),
                    video_id
                ))
            })?;
        let dest = dir.join(final_name);

        // Only one output may exist per video
        for (path, name) in self.namespace_files(namespace).await? {
            if path != dest
                && classify(&name) == (Some(video_id.to_string()), ArtifactKind::Output)
            {
                match fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "Removed output of earlier run"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        fs::rename(staged, &dest).await?;
        debug!(video_id, path = %dest.display(), "Promoted output");
        Ok(dest)
    }

    async fn thumbnail_path(
        &self,
        video_id: &str,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        let dir = self.ensure_namespace_dir(namespace).await?;
        Ok(dir.join(thumbnail_file_name(video_id)))
    }

    async fn get_processed_file(
        &self,
        video_id: &str,
        namespace: &Namespace,
    ) -> PipelineResult<PathBuf> {
        validate_video_id(video_id)?;
        self.namespace_files(namespace)
            .await?
            .into_iter()
            .find(|(_, name)| classify(name) == (Some(video_id.to_string()), ArtifactKind::Output))
            .map(|(path, _)| path)
            .ok_or_else(|| {
                PipelineError::not_found(format!(
                    "processed file for video {} in {}",
                    video_id, namespace
                ))
            })
    }

    async fn list_artifacts(&self, namespace: &Namespace) -> PipelineResult<Vec<DanglingFile>> {
        let mut artifacts = Vec::new();
        for (path, name) in self.namespace_files(namespace).await? {
            let metadata = match fs::metadata(&path).await {
                Ok(metadata) => metadata,
                // deleted between listing and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let created_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let (associated_video_id, kind) = classify(&name);

            artifacts.push(DanglingFile {
                path,
                associated_video_id,
                kind,
                size: metadata.len(),
                created_at,
            });
        }
        Ok(artifacts)
    }

    async fn remove_artifact(&self, namespace: &Namespace, path: &Path) -> PipelineResult<bool> {
        let dir = self.namespace_dir(namespace);
        if path.parent() != Some(dir.as_path()) {
            return Err(PipelineError::invalid_input(format!(
                "{} is not an artifact of {}",
                path.display(),
                namespace
            )));
        }
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed artifact");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_artifacts(
        &self,
        video_id: &str,
        namespace: &Namespace,
    ) -> PipelineResult<usize> {
        validate_video_id(video_id)?;
        let mut removed = 0;
        for (path, name) in self.namespace_files(namespace).await? {
            if !belongs_to(&name, video_id) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            info!(video_id, namespace = %namespace, removed, "Deleted artifacts");
        }
        Ok(removed)
    }
}

fn with_part_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn copy_source(from: &Path, to: &Path) -> PipelineResult<()> {
    match fs::copy(from, to).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PipelineError::not_found(format!(
            "source file {}",
            from.display()
        ))),
        Err(e) => Err(e.into()),
    }
}
