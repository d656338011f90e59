use serde::Deserialize;

use crate::error::{MediaError, MediaResult};

/// Limits and tuning for the frame pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Frame budget a decomposed sequence is sampled down to.
    pub max_frames: usize,
    /// Largest width or height accepted for a single still image.
    pub max_px_single_frame: u32,
    /// Largest width or height accepted for animations and videos.
    pub max_px_multi_frame: u32,
    /// Smallest width or height accepted for anything.
    pub min_px: u32,
    /// Mean-squared difference below which consecutive frames are merged.
    pub mse_strength: f64,
    /// Average sampled frame rate ceiling for videos. `None` disables it.
    pub max_video_fps: Option<u32>,
    /// Animated frames declaring less than this are shown for this long.
    pub min_frame_delay_ms: u64,
    /// Concurrent pipeline runs. 0 means one per CPU.
    pub workers: usize,
    /// Pending progress events kept before new ones are dropped.
    pub progress_queue: usize,
    /// Longest side of progress preview thumbnails. 0 disables previews.
    pub preview_px: u32,
    /// GIF palette quantization speed, 1 (best) to 30 (fastest).
    pub gif_quantize_speed: i32,
    /// Crop each GIF frame to its visible pixels.
    pub optimize_frames: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_frames: 50,
            max_px_single_frame: 6000,
            max_px_multi_frame: 640,
            min_px: 32,
            mse_strength: 0.03,
            max_video_fps: Some(15),
            min_frame_delay_ms: 20,
            workers: 0,
            progress_queue: 4,
            preview_px: 128,
            gif_quantize_speed: 10,
            optimize_frames: true,
        }
    }
}

impl MediaConfig {
    pub fn validate(&self) -> MediaResult<()> {
        let fail = |msg: String| Err(MediaError::Config(msg));

        if self.max_frames == 0 {
            return fail("max_frames must be > 0".into());
        }
        if self.min_px > self.max_px_multi_frame || self.min_px > self.max_px_single_frame {
            return fail(format!(
                "min_px ({}) must not exceed max_px_multi_frame ({}) or max_px_single_frame ({})",
                self.min_px, self.max_px_multi_frame, self.max_px_single_frame
            ));
        }
        if !self.mse_strength.is_finite() || self.mse_strength < 0.0 {
            return fail(format!("mse_strength must be >= 0, got {}", self.mse_strength));
        }
        if self.max_video_fps == Some(0) {
            return fail("max_video_fps must be > 0 when set".into());
        }
        if !(1..=30).contains(&self.gif_quantize_speed) {
            return fail(format!(
                "gif_quantize_speed must be within 1..=30, got {}",
                self.gif_quantize_speed
            ));
        }
        Ok(())
    }

    /// Number of pipeline runs allowed at once.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Resolution ceiling for a source with `frame_count` frames.
    pub fn max_px_for(&self, frame_count: usize) -> u32 {
        if frame_count > 1 {
            self.max_px_multi_frame
        } else {
            self.max_px_single_frame
        }
    }
}
