//! Configuration loaded from the environment (and `.env` when present).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Encoder knobs used to reach the target codec.
#[derive(Clone, Debug)]
pub struct EncoderSettings {
    /// Codec name that needs no transcoding, as reported by ffprobe
    pub target_codec: String,
    /// FFmpeg encoder producing `target_codec`
    pub video_encoder: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub thumbnail_width: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            target_codec: "h264".to_string(),
            video_encoder: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            thumbnail_width: 640,
        }
    }
}

/// Configuration of the processing pipeline itself.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Root of the namespace working areas
    pub work_dir: PathBuf,
    /// Root of the local object store
    pub objects_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub encoder: EncoderSettings,
    /// Wall-clock limit per job, none by default
    pub job_timeout: Option<Duration>,
    /// Re-run jobs with a recorded error on startup
    pub retry_failed_on_restart: bool,
    pub generate_thumbnails: bool,
    /// Age after which an artifact with no running job is purged
    pub orphan_min_age: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./data/work"),
            objects_dir: PathBuf::from("./data/objects"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            encoder: EncoderSettings::default(),
            job_timeout: None,
            retry_failed_on_restart: false,
            generate_thumbnails: true,
            orphan_min_age: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();
        let encoder = defaults.encoder;

        Self {
            work_dir: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            objects_dir: env::var("OBJECTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.objects_dir),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            encoder: EncoderSettings {
                target_codec: env::var("TARGET_CODEC").unwrap_or(encoder.target_codec),
                video_encoder: env::var("VIDEO_ENCODER").unwrap_or(encoder.video_encoder),
                preset: env::var("VIDEO_PRESET").unwrap_or(encoder.preset),
                crf: parsed("VIDEO_CRF").unwrap_or(encoder.crf),
                audio_codec: env::var("AUDIO_CODEC").unwrap_or(encoder.audio_codec),
                thumbnail_width: parsed("THUMBNAIL_WIDTH").unwrap_or(encoder.thumbnail_width),
            },
            job_timeout: parsed::<u64>("JOB_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            retry_failed_on_restart: parsed("RETRY_FAILED_ON_RESTART")
                .unwrap_or(defaults.retry_failed_on_restart),
            generate_thumbnails: parsed("GENERATE_THUMBNAILS")
                .unwrap_or(defaults.generate_thumbnails),
            orphan_min_age: parsed::<u64>("ORPHAN_MIN_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.orphan_min_age),
        }
    }
}

/// Configuration for local/monolith deployment.
#[cfg(feature = "local")]
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Namespace served by this instance, `/`-separated
    pub namespace: String,
    pub pipeline: PipelineConfig,
}

#[cfg(feature = "local")]
impl LocalConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let pipeline = PipelineConfig::from_env();

        Self {
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: env::var("PORT").unwrap_or_else(|_| String::from("3000")),
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1/")),
            namespace: env::var("PIPELINE_NAMESPACE").unwrap_or_else(|_| String::from("capsules")),
            pipeline,
        }
    }
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
