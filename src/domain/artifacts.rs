//! Naming of temp artifacts inside a namespace working area.
//!
//! Every artifact is `<video_id>.<kind>.<ext>` so ownership can be recovered
//! from a directory listing alone:
//! - `<id>.source.<ext>`: local working copy of the input
//! - `<id>.output.<ext>`: finished output of a completed run
//! - `<id>.output.<ext>.staged`: output of a run that has not completed yet
//! - `<id>.output.mp4.part`: output still being written
//! - `<id>.thumb.jpg`: poster frame

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Source,
    Output,
    Partial,
    Thumbnail,
    Unknown,
}

/// A temp artifact found in a namespace working area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanglingFile {
    pub path: PathBuf,
    pub associated_video_id: Option<String>,
    pub kind: ArtifactKind,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

pub const PARTIAL_SUFFIX: &str = "part";
pub const STAGED_SUFFIX: &str = "staged";

pub fn source_file_name(video_id: &str, ext: &str) -> String {
    format!("{}.source.{}", video_id, ext)
}

pub fn output_file_name(video_id: &str, ext: &str) -> String {
    format!("{}.output.{}", video_id, ext)
}

pub fn staged_output_file_name(video_id: &str, ext: &str) -> String {
    format!("{}.output.{}.{}", video_id, ext, STAGED_SUFFIX)
}

pub fn thumbnail_file_name(video_id: &str) -> String {
    format!("{}.thumb.jpg", video_id)
}

/// Classify a file name found in a working area.
pub fn classify(file_name: &str) -> (Option<String>, ArtifactKind) {
    let mut parts = file_name.split('.');
    let id = parts.next().unwrap_or_default();
    let kind = parts.next();
    let rest: Vec<&str> = parts.collect();

    let valid_id = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_id || rest.is_empty() {
        return (None, ArtifactKind::Unknown);
    }

    let partial = rest.len() > 1
        && rest
            .last()
            .is_some_and(|suffix| *suffix == PARTIAL_SUFFIX || *suffix == STAGED_SUFFIX);
    let kind = match kind {
        Some("source") => ArtifactKind::Source,
        Some("output") if partial => ArtifactKind::Partial,
        Some("output") => ArtifactKind::Output,
        Some("thumb") => ArtifactKind::Thumbnail,
        _ => return (None, ArtifactKind::Unknown),
    };
    (Some(id.to_string()), kind)
}

/// True if `file_name` is an artifact owned by `video_id`.
pub fn belongs_to(file_name: &str, video_id: &str) -> bool {
    matches!(classify(file_name), (Some(id), _) if id == video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_artifacts() {
        assert_eq!(
            classify(&source_file_name("v1", "mov")),
            (Some("v1".into()), ArtifactKind::Source)
        );
        assert_eq!(
            classify(&output_file_name("v1", "mp4")),
            (Some("v1".into()), ArtifactKind::Output)
        );
        assert_eq!(
            classify("v1.output.mp4.part"),
            (Some("v1".into()), ArtifactKind::Partial)
        );
        assert_eq!(
            classify(&staged_output_file_name("v1", "mp4")),
            (Some("v1".into()), ArtifactKind::Partial)
        );
        assert_eq!(
            classify("v1.output.mp4.staged.part"),
            (Some("v1".into()), ArtifactKind::Partial)
        );
        assert_eq!(
            classify(&thumbnail_file_name("v1")),
            (Some("v1".into()), ArtifactKind::Thumbnail)
        );
    }

    #[test]
    fn test_classify_foreign_files() {
        assert_eq!(classify(".DS_Store"), (None, ArtifactKind::Unknown));
        assert_eq!(classify("notes.txt"), (None, ArtifactKind::Unknown));
        assert_eq!(classify("v1.backup.mp4"), (None, ArtifactKind::Unknown));
        assert_eq!(classify("v1"), (None, ArtifactKind::Unknown));
    }

    #[test]
    fn test_ownership_is_exact() {
        assert!(belongs_to("abc.source.mp4", "abc"));
        assert!(!belongs_to("abcd.source.mp4", "abc"));
        assert!(!belongs_to("abc.source.mp4", "ab"));
    }
}
