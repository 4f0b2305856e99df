use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Container and codec metadata of a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Video codec name as reported by ffprobe (`h264`, `hevc`, `vp9`, ...)
    pub codec: String,
    pub has_audio: bool,
}

impl ProbeResult {
    pub fn is_horizontal(&self) -> bool {
        self.width > self.height
    }

    /// Codec names are compared case-insensitively.
    pub fn has_codec(&self, codec: &str) -> bool {
        self.codec.eq_ignore_ascii_case(codec)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Build a [`ProbeResult`] from `ffprobe -print_format json -show_format -show_streams`.
pub fn parse_ffprobe_json(stdout: &[u8]) -> PipelineResult<ProbeResult> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| PipelineError::probe(format!("unreadable ffprobe output: {}", e), None))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::probe("no video stream found", None))?;

    let codec = video
        .codec_name
        .clone()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| PipelineError::probe("video stream has no codec", None))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(PipelineError::probe(
                "video stream has no valid dimensions",
                None,
            ))
        }
    };

    // Container duration first, stream duration as fallback
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(ProbeResult {
        duration,
        width,
        height,
        codec,
        has_audio,
    })
}
