use anyhow::Result;
use image::RgbaImage;

use crate::time::Rational;

/// What a container declares about itself before any frame is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Declared total frame count. May be an estimate for some containers.
    pub frame_count: usize,
    /// Declared playback length, when the container carries one.
    pub duration: Option<Rational>,
}

/// A frame as it comes out of a decoder, in display order.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub image: RgbaImage,
    /// Presentation timestamp in stream units. `None` means the decoder could
    /// not place this frame on the timeline.
    pub timestamp: Option<i64>,
    /// The frame's own native display time.
    pub duration: Rational,
}

/// Common interface for everything that yields decoded frames.
pub trait FrameSource {
    /// Short format name used in logs and rejection messages.
    fn format_name(&self) -> &str;

    fn info(&self) -> SourceInfo;

    /// Decode the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>>;
}
