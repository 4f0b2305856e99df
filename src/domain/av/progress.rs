//! Parsing of ffmpeg's `-progress` key/value stream and stderr banner.

use regex::Regex;
use std::sync::OnceLock;

/// Accumulated state of one `-progress` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeProgress {
    /// Output time in microseconds
    pub out_time_us: i64,
    pub frame: u64,
    /// Encoding speed relative to realtime, 0.0 when unknown
    pub speed: f64,
    pub is_complete: bool,
}

impl EncodeProgress {
    /// Percentage of `duration_secs` encoded so far, clamped to [0, 100].
    pub fn percentage(&self, duration_secs: f64) -> f64 {
        if self.is_complete {
            return 100.0;
        }
        if duration_secs.is_nan() || duration_secs <= 0.0 {
            return 0.0;
        }
        let done = self.out_time_us.max(0) as f64 / 1_000_000.0;
        (done / duration_secs * 100.0).clamp(0.0, 100.0)
    }
}

/// Feed one line of `-progress` output.
///
/// Returns a snapshot each time a block ends (`progress=continue|end`).
pub fn parse_progress_line(line: &str, current: &mut EncodeProgress) -> Option<EncodeProgress> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        // out_time_ms is microseconds too, despite its name
        "out_time_us" | "out_time_ms" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_us = us;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "speed" => {
            if let Some(speed) = value.trim().strip_suffix('x').and_then(|s| s.parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }
    None
}

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration regex")
    })
}

/// Extract the input duration from ffmpeg's `Duration: HH:MM:SS.ss` banner line.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let caps = duration_regex().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
