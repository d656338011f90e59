use image::RgbaImage;
use tracing::debug;

use crate::time::Rational;

/// Where a sequence came from. Frames of every kind share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// Sampled from a compressed video stream.
    Video,
    /// Sampled from a multi-frame image (GIF, WebP, APNG).
    Animated,
    /// A single still image.
    Image,
}

impl SequenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SequenceKind::Video => "video",
            SequenceKind::Animated => "animated",
            SequenceKind::Image => "image",
        }
    }
}

/// A single frame with its display time.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// The frame's pixels.
    pub image: RgbaImage,
    /// How long this frame stays on screen.
    pub duration: Rational,
}

impl Frame {
    pub fn new(image: RgbaImage, duration: Rational) -> Self {
        Self { image, duration }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// An ordered, timed run of frames.
///
/// The frame list can only be replaced wholesale, which keeps the frame count
/// and the derived timing in step with it.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    kind: SequenceKind,
    frames: Vec<Frame>,
    width: u32,
    height: u32,
    total_duration: Rational,
    avg_fps: Rational,
}

impl FrameSequence {
    /// `width`/`height` is the nominal resolution; individual frames may differ.
    pub fn new(kind: SequenceKind, width: u32, height: u32, frames: Vec<Frame>) -> Self {
        let mut seq = Self {
            kind,
            frames,
            width,
            height,
            total_duration: Rational::ZERO,
            avg_fps: Rational::ZERO,
        };
        seq.recompute_timing();
        seq
    }

    /// A one-frame `Image` sequence with no display time.
    pub fn still(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(
            SequenceKind::Image,
            width,
            height,
            vec![Frame::new(image, Rational::ZERO)],
        )
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn framecount(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_duration(&self) -> Rational {
        self.total_duration
    }

    /// `framecount / total_duration`, or zero when the sequence has no duration.
    pub fn avg_fps(&self) -> Rational {
        self.avg_fps
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frames may be edited in place but not added or removed.
    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Swap the frame list and recompute the derived timing.
    pub fn replace_frames(&mut self, frames: Vec<Frame>) -> Vec<Frame> {
        let old = std::mem::replace(&mut self.frames, frames);
        self.recompute_timing();
        old
    }

    /// Recompute `total_duration` and `avg_fps` from the current frames.
    pub fn recompute_timing(&mut self) {
        self.total_duration = self.frames.iter().map(|f| f.duration).sum();
        self.avg_fps = Rational::from_int(self.frames.len() as u64)
            .checked_div(self.total_duration)
            .unwrap_or(Rational::ZERO);
        debug!(
            kind = self.kind.as_str(),
            framecount = self.frames.len(),
            total_duration = %self.total_duration,
            avg_fps = %self.avg_fps,
            "sequence timing recomputed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ms: u64) -> Frame {
        Frame::new(RgbaImage::new(4, 4), Rational::from_millis(ms))
    }

    #[test]
    fn timing_is_derived_from_frames() {
        let seq = FrameSequence::new(
            SequenceKind::Animated,
            4,
            4,
            vec![frame(100), frame(100), frame(50)],
        );
        assert_eq!(seq.framecount(), 3);
        assert_eq!(seq.total_duration(), Rational::from_millis(250));
        assert_eq!(seq.avg_fps(), Rational::from_int(12));
    }

    #[test]
    fn replace_frames_keeps_count_and_timing_in_step() {
        let mut seq = FrameSequence::new(SequenceKind::Video, 4, 4, vec![frame(40); 5]);
        assert_eq!(seq.framecount(), 5);

        let mut frames = seq.replace_frames(Vec::new());
        frames.truncate(2);
        seq.replace_frames(frames);

        assert_eq!(seq.framecount(), 2);
        assert_eq!(seq.total_duration(), Rational::from_millis(80));
        assert_eq!(seq.avg_fps(), Rational::from_int(25));
    }

    #[test]
    fn still_has_zero_duration_and_no_fps() {
        let seq = FrameSequence::still(RgbaImage::new(10, 20));
        assert_eq!(seq.kind(), SequenceKind::Image);
        assert_eq!(seq.framecount(), 1);
        assert_eq!((seq.width(), seq.height()), (10, 20));
        assert!(seq.total_duration().is_zero());
        assert!(seq.avg_fps().is_zero());
    }
}
