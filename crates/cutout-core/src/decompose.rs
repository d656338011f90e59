//! Sampling of multi-frame sources down to a bounded, timed frame sequence.
//!
//! One frame out of every `stride` decoded frames is kept, and its display
//! time is stretched by `stride`. That is exact for constant frame rate
//! sources and an approximation for variable frame rate ones.

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::pipeline::Cancelled;
use crate::time::Rational;
use crate::video::{Frame, FrameSequence, FrameSource, SequenceKind, SourceInfo};

/// `ceil(frame_count / max_frames)`, never less than 1.
pub fn stride(frame_count: usize, max_frames: usize) -> usize {
    if max_frames == 0 {
        return frame_count.max(1);
    }
    frame_count.div_ceil(max_frames).max(1)
}

/// Narrow the frame budget so the sampled video averages at most `max_fps`.
pub fn video_frame_budget(info: &SourceInfo, max_frames: usize, max_fps: Option<u32>) -> usize {
    let (Some(max_fps), Some(duration)) = (max_fps, info.duration) else {
        return max_frames;
    };
    let fps_budget = duration.mul_int(max_fps as u64).ceil().max(1);
    let budget = max_frames.min(usize::try_from(fps_budget).unwrap_or(usize::MAX));
    if budget < max_frames {
        debug!(max_frames, budget, max_fps, "frame budget narrowed by fps ceiling");
    }
    budget
}

/// Sample `source` down to at most `max_frames` frames (when its declared
/// frame count is accurate).
///
/// `min_frame_duration` raises shorter native durations before they are
/// scaled by the stride. Frames without a timestamp are skipped and do not
/// advance the sampling window.
pub fn decompose<S: FrameSource + ?Sized>(
    source: &mut S,
    kind: SequenceKind,
    max_frames: usize,
    min_frame_duration: Option<Rational>,
) -> Result<FrameSequence> {
    let info = source.info();
    if info.frame_count == 0 {
        bail!("{} reports no frames", source.format_name());
    }

    let stride = stride(info.frame_count, max_frames);
    info!(
        kind = kind.as_str(),
        declared_frames = info.frame_count,
        max_frames,
        stride,
        "decomposing source"
    );

    let mut frames = Vec::with_capacity(info.frame_count.div_ceil(stride));
    let mut window_pos = 0;
    let mut skipped = 0usize;

    while let Some(frame) = source.next_frame()? {
        if frame.timestamp.is_none() {
            skipped += 1;
            continue;
        }

        if window_pos == 0 {
            let native = match min_frame_duration {
                Some(min) if frame.duration < min => min,
                _ => frame.duration,
            };
            let duration = native.mul_int(stride as u64);
            debug!(
                frame_number = frames.len(),
                native = %native,
                duration = %duration,
                "kept frame"
            );
            frames.push(Frame::new(frame.image, duration));
        }

        window_pos = (window_pos + 1) % stride;
    }

    if frames.is_empty() {
        bail!("{} produced no frames with a valid timestamp", source.format_name());
    }

    let seq = FrameSequence::new(kind, info.width, info.height, frames);
    if seq.total_duration().is_zero() {
        bail!("{} has zero total duration", source.format_name());
    }

    info!(
        kind = kind.as_str(),
        framecount = seq.framecount(),
        skipped,
        total_duration = %seq.total_duration(),
        avg_fps = %seq.avg_fps(),
        "decomposition complete"
    );
    Ok(seq)
}

/// Decompose a video stream, reporting failures as `VideoDecomposition`.
pub fn decompose_video<S: FrameSource + ?Sized>(
    source: &mut S,
    max_frames: usize,
) -> MediaResult<FrameSequence> {
    decompose(source, SequenceKind::Video, max_frames, None)
        .map_err(|err| classify(err, MediaError::VideoDecomposition))
}

/// Decompose an animated image, reporting failures as `ImageDecomposition`.
/// Declared delays below `min_delay_ms` (including zero) are raised to it.
pub fn decompose_animated<S: FrameSource + ?Sized>(
    source: &mut S,
    max_frames: usize,
    min_delay_ms: u64,
) -> MediaResult<FrameSequence> {
    let min = Some(Rational::from_millis(min_delay_ms)).filter(|d| !d.is_zero());
    decompose(source, SequenceKind::Animated, max_frames, min)
        .map_err(|err| classify(err, MediaError::ImageDecomposition))
}

fn classify(err: anyhow::Error, wrap: fn(anyhow::Error) -> MediaError) -> MediaError {
    if err.is::<Cancelled>() {
        MediaError::Cancelled
    } else {
        wrap(err)
    }
}
