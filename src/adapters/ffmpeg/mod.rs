//! FFmpeg/FFprobe CLI adapter implementing the [`Transcoder`] port.

pub mod command;

use crate::config::EncoderSettings;
use crate::domain::artifacts::PARTIAL_SUFFIX;
use crate::domain::av::probe::{parse_ffprobe_json, ProbeResult};
use crate::domain::av::progress::{parse_duration_line, parse_progress_line, EncodeProgress};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::transcoder::{EncodeProgressFn, Transcoder};
use async_trait::async_trait;
use command::FfmpegCommand;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    ffprobe_path: String,
    settings: EncoderSettings,
}

impl FfmpegTranscoder {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        ffprobe_path: impl Into<String>,
        settings: EncoderSettings,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            settings,
        }
    }

    /// Resolve both tool binaries.
    pub fn check_tools(&self) -> PipelineResult<(PathBuf, PathBuf)> {
        let ffmpeg = which::which(&self.ffmpeg_path)
            .map_err(|_| PipelineError::ToolNotFound(self.ffmpeg_path.clone()))?;
        let ffprobe = which::which(&self.ffprobe_path)
            .map_err(|_| PipelineError::ToolNotFound(self.ffprobe_path.clone()))?;
        Ok((ffmpeg, ffprobe))
    }

    fn transcode_command(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .with_progress()
            .output_args(["-map", "0:v:0", "-map", "0:a?"])
            .video_codec(&self.settings.video_encoder)
            .preset(&self.settings.preset)
            .crf(self.settings.crf)
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec(&self.settings.audio_codec)
            .output_args(["-movflags", "+faststart"])
            .format("mp4")
    }

    /// Run ffmpeg until it exits, forwarding progress and honouring `cancel`.
    async fn run(
        &self,
        cmd: &FfmpegCommand,
        on_progress: Option<&EncodeProgressFn>,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.ffmpeg_path, args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.ffmpeg_path, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::transcode("ffmpeg stdout not captured", None, None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::transcode("ffmpeg stderr not captured", None, None))?;

        let (duration_tx, duration_rx) = watch::channel(None::<f64>);
        let stderr_task = tokio::spawn(collect_stderr(stderr, duration_tx));

        let mut lines = BufReader::new(stdout).lines();
        let mut current = EncodeProgress::default();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(snapshot) = parse_progress_line(&line, &mut current) {
                            if let Some(on_progress) = on_progress {
                                let duration = (*duration_rx.borrow()).unwrap_or(0.0);
                                on_progress(snapshot.percentage(duration));
                            }
                        }
                    }
                    // stdout closed, the process is exiting
                    Ok(None) | Err(_) => break,
                }
            }
        }

        let status = if cancelled {
            None
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                status = child.wait() => Some(status?),
            }
        };

        let Some(status) = status else {
            kill(&mut child).await;
            stderr_task.abort();
            return Err(PipelineError::Aborted);
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::transcode(
                format!("ffmpeg exited with {}", status),
                Some(stderr_tail),
                status.code(),
            ))
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> PipelineResult<ProbeResult> {
        if !tokio::fs::try_exists(input).await? {
            return Err(PipelineError::not_found(input.display().to_string()));
        }

        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.ffprobe_path, e))?;

        if !output.status.success() {
            return Err(PipelineError::probe(
                format!("ffprobe exited with {}", output.status),
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        parse_ffprobe_json(&output.stdout)
    }

    async fn transcode_to_standard_codec(
        &self,
        input: &Path,
        output: &Path,
        on_progress: &EncodeProgressFn,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        // Encode next to the destination and only rename once ffmpeg succeeded,
        // so `output` never holds a truncated file.
        let partial = partial_path(output);
        let cmd = self.transcode_command(input, &partial);

        match self.run(&cmd, Some(on_progress), cancel).await {
            Ok(()) if cancel.is_cancelled() => {
                remove_if_exists(&partial).await;
                Err(PipelineError::Aborted)
            }
            Ok(()) => {
                tokio::fs::rename(&partial, output).await?;
                info!(output = %output.display(), "Transcode finished");
                Ok(())
            }
            Err(e) => {
                remove_if_exists(&partial).await;
                Err(e)
            }
        }
    }

    async fn extract_thumbnail(
        &self,
        input: &Path,
        output: &Path,
        at_seconds: f64,
        cancel: &CancellationToken,
    ) -> PipelineResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .seek(at_seconds.max(0.0))
            .output_args(["-frames:v", "1", "-q:v", "3"])
            .video_filter(format!("scale={}:-2", self.settings.thumbnail_width));

        let result = self.run(&cmd, None, cancel).await;
        if result.is_err() {
            remove_if_exists(output).await;
        }
        result
    }
}

/// `<output>.part`
pub fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    output.with_file_name(name)
}

fn spawn_error(tool: &str, err: std::io::Error) -> PipelineError {
    if err.kind() == std::io::ErrorKind::NotFound {
        PipelineError::ToolNotFound(tool.to_string())
    } else {
        PipelineError::Io(err)
    }
}

async fn kill(child: &mut Child) {
    info!("FFmpeg cancelled, killing process");
    if let Err(e) = child.kill().await {
        warn!("Failed to kill ffmpeg: {}", e);
    }
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove partial output: {}", e),
    }
}

/// Drain stderr, publishing the input duration and returning the last lines.
async fn collect_stderr<R>(stderr: R, duration_tx: watch::Sender<Option<f64>>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if duration_tx.borrow().is_none() {
            if let Some(duration) = parse_duration_line(&line) {
                let _ = duration_tx.send(Some(duration));
            }
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/work/capsules/v1.output.mp4")),
            PathBuf::from("/work/capsules/v1.output.mp4.part")
        );
    }

    #[test]
    fn test_transcode_command_targets_standard_codec() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", "ffprobe", EncoderSettings::default());
        let args = transcoder
            .transcode_command(Path::new("in.mov"), Path::new("out.mp4.part"))
            .build_args();

        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:a?"]));
    }

    #[tokio::test]
    async fn test_collect_stderr_reads_duration_and_tail() {
        let stderr = b"Input #0, mov,mp4\n  Duration: 00:00:42.00, start: 0.0\nfatal: bad\n".to_vec();
        let (tx, rx) = watch::channel(None);

        let tail = collect_stderr(std::io::Cursor::new(stderr), tx).await;

        assert_eq!(*rx.borrow(), Some(42.0));
        assert!(tail.ends_with("fatal: bad"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_not_found() {
        let transcoder = FfmpegTranscoder::new(
            "definitely-not-ffmpeg-xyz",
            "definitely-not-ffprobe-xyz",
            EncoderSettings::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        tokio::fs::write(&input, b"data").await.unwrap();

        let err = transcoder.probe(&input).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound(_)));

        let output = dir.path().join("out.mp4");
        let err = transcoder
            .transcode_to_standard_codec(&input, &output, &|_p: f64| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolNotFound(_)));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_probe_missing_input_is_not_found() {
        let transcoder = FfmpegTranscoder::new("ffmpeg", "ffprobe", EncoderSettings::default());
        let err = transcoder
            .probe(Path::new("/nonexistent/capsule/input.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
