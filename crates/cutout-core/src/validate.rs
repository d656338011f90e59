use tracing::info;

use crate::config::MediaConfig;
use crate::error::{MediaError, MediaResult};

/// Check declared dimensions against the ceiling for `frame_count` frames and
/// the global floor.
///
/// A source is rejected when either side exceeds the ceiling, or when either
/// side falls below the floor.
pub fn check_resolution(
    format: &str,
    width: u32,
    height: u32,
    frame_count: usize,
    config: &MediaConfig,
) -> MediaResult<()> {
    let max_px = config.max_px_for(frame_count);
    if width > max_px || height > max_px {
        info!(format, width, height, max_px, "rejecting oversized input");
        return Err(MediaError::ExceedsMaxResolution {
            format: format.to_owned(),
            width,
            height,
            max_px,
        });
    }

    let min_px = config.min_px;
    if width < min_px || height < min_px {
        info!(format, width, height, min_px, "rejecting undersized input");
        return Err(MediaError::SubceedsMinResolution {
            format: format.to_owned(),
            width,
            height,
            min_px,
        });
    }
    Ok(())
}

pub fn check_frame_count(format: &str, frames: usize, max_frames: usize) -> MediaResult<()> {
    if frames > max_frames {
        info!(format, frames, max_frames, "rejecting input with too many frames");
        return Err(MediaError::ExceedsMaxFrames {
            format: format.to_owned(),
            frames,
            max_frames,
        });
    }
    Ok(())
}
