use crate::domain::av::probe::ProbeResult;
use crate::error::{PipelineError, PipelineResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Ordered path segments scoping temp files, e.g. `capsules/attachments`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(Vec<String>);

impl Namespace {
    pub fn new<I, S>(segments: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(PipelineError::invalid_input("namespace must not be empty"));
        }
        for segment in &segments {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\'])
            {
                return Err(PipelineError::invalid_input(format!(
                    "invalid namespace segment {:?}",
                    segment
                )));
            }
        }
        Ok(Self(segments))
    }

    /// Parse a `/`-separated namespace.
    pub fn parse(value: &str) -> PipelineResult<Self> {
        Self::new(value.trim_matches('/').split('/'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Directory of this namespace below `root`.
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        self.0.iter().fold(root.to_path_buf(), |dir, s| dir.join(s))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl TryFrom<String> for Namespace {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.to_string()
    }
}

/// Video ids become artifact filename prefixes, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_video_id(video_id: &str) -> PipelineResult<()> {
    let valid = !video_id.is_empty()
        && video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::invalid_input(format!(
            "invalid video id {:?}",
            video_id
        )))
    }
}

/// Object keys must stay inside the object store.
pub fn validate_object_key(key: &str) -> PipelineResult<()> {
    let path = Path::new(key);
    let escapes = key.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        Err(PipelineError::invalid_input(format!(
            "invalid object key {:?}",
            key
        )))
    } else {
        Ok(())
    }
}

/// Where the input bytes of a video live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceHandle {
    /// A file already on local disk.
    Local(PathBuf),
    /// An object addressed by key inside the media store.
    Object { key: String },
    /// Bytes held in memory.
    Memory {
        bytes: Bytes,
        file_name: Option<String>,
    },
}

impl SourceHandle {
    /// File extension hint used when naming the local working copy.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            SourceHandle::Local(path) => path.to_str(),
            SourceHandle::Object { key } => Some(key.as_str()),
            SourceHandle::Memory { file_name, .. } => file_name.as_deref(),
        }?;
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Input of one processing run.
#[derive(Debug, Clone)]
pub struct VideoInput {
    pub id: String,
    pub source: SourceHandle,
}

impl VideoInput {
    pub fn new(id: impl Into<String>, source: SourceHandle) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Probing,
    Transcoding,
    Finalizing,
    Completed,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted
        )
    }
}

/// In-memory state of one video being processed.
///
/// Progress never regresses within a run and only reaches 100 through
/// [`ProcessingJob::complete`].
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub video_id: String,
    pub namespace: Namespace,
    status: JobStatus,
    progress: u8,
    error: Option<String>,
}

impl ProcessingJob {
    pub fn new(video_id: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            video_id: video_id.into(),
            namespace,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn advance(&mut self, next: JobStatus) {
        if self.status.is_terminal() {
            return;
        }
        debug!(
            video_id = %self.video_id,
            from = ?self.status,
            to = ?next,
            "Job state transition"
        );
        self.status = next;
    }

    /// Record a progress report and return the clamped value plus whether it moved.
    pub fn record_progress(&mut self, percent: u8) -> (u8, bool) {
        // 100 is reserved for completion
        let capped = percent.min(99);
        if capped > self.progress {
            self.progress = capped;
            (capped, true)
        } else {
            (self.progress, false)
        }
    }

    pub fn complete(&mut self) {
        self.advance(JobStatus::Completed);
        self.progress = 100;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.advance(JobStatus::Failed);
    }

    pub fn abort(&mut self) {
        self.advance(JobStatus::Aborted);
    }
}

/// Outcome of the probe-and-maybe-transcode phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOutcome {
    pub was_converted: bool,
    pub output_handle: PathBuf,
    pub final_codec: String,
}

/// Result descriptor returned to callers once a run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub video_id: String,
    pub namespace: Namespace,
    pub probe: ProbeResult,
    pub outcome: TranscodeOutcome,
    pub thumbnail: Option<PathBuf>,
}
