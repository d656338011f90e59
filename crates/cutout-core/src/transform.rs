use anyhow::Result;
use image::RgbaImage;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::pipeline::CancelToken;
use crate::progress::ProgressSink;
use crate::video::FrameSequence;

/// A fallible image-to-image step applied to every frame, e.g. background
/// removal.
pub trait FrameTransform: Send + Sync {
    fn apply(&self, image: &RgbaImage) -> Result<RgbaImage>;
}

impl<F> FrameTransform for F
where
    F: Fn(&RgbaImage) -> Result<RgbaImage> + Send + Sync,
{
    fn apply(&self, image: &RgbaImage) -> Result<RgbaImage> {
        self(image)
    }
}

/// Leaves frames untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FrameTransform for Passthrough {
    fn apply(&self, image: &RgbaImage) -> Result<RgbaImage> {
        Ok(image.clone())
    }
}

/// Run `transform` over every frame in index order, replacing each image.
///
/// The first failure aborts the run with the failing frame's index. Progress
/// is reported after each frame and never affects the outcome.
pub fn apply_transform(
    seq: &mut FrameSequence,
    transform: &dyn FrameTransform,
    progress: Option<&ProgressSink>,
    cancel: Option<&CancelToken>,
) -> MediaResult<()> {
    let total = seq.framecount();
    info!(total, kind = seq.kind().as_str(), "applying transform to frames");

    for (index, frame) in seq.frames_mut().iter_mut().enumerate() {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            info!(index, total, "transform cancelled");
            return Err(MediaError::Cancelled);
        }

        let image = transform
            .apply(&frame.image)
            .map_err(|source| MediaError::Transform { index, source })?;
        debug!(
            frame_number = index,
            width = image.width(),
            height = image.height(),
            "frame transformed"
        );
        frame.image = image;

        if let Some(sink) = progress {
            sink.notify(index, total, &frame.image);
        }
    }

    info!(total, "transform complete");
    Ok(())
}
