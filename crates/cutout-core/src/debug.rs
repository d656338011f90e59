use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::Rgba;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use crate::rect::opaque_bounds;
use crate::video::Frame;

const BOUNDS_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

const TEXT_SCALE: f32 = 14.0;
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEXT_LINE_HEIGHT: i32 = 16;

/// Writes transformed frames to disk with their visible region outlined.
pub struct DebugRenderer {
    dir: PathBuf,
    font: Option<FontVec>,
}

impl DebugRenderer {
    /// Create `dir` if needed. Without a usable font, frames are written
    /// without the text overlay.
    pub fn new(dir: impl Into<PathBuf>, font_path: Option<&Path>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create debug frames directory {}", dir.display()))?;
        info!(?dir, "debug frames directory ready");

        let font = font_path.and_then(load_font);
        Ok(Self { dir, font })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_frame(&self, index: usize, frame: &Frame) -> Result<PathBuf> {
        let mut img = frame.image.clone();

        match opaque_bounds(&img) {
            Some(bounds) => {
                let rect = Rect::at(bounds.x as i32, bounds.y as i32).of_size(bounds.w, bounds.h);
                draw_hollow_rect_mut(&mut img, rect, BOUNDS_COLOR);
            }
            None => debug!(frame_number = index, "frame is fully transparent"),
        }

        if let Some(font) = &self.font {
            let scale = PxScale::from(TEXT_SCALE);
            let header = format!("F:{index}");
            draw_text_mut(&mut img, TEXT_COLOR, 4, 4, scale, font, &header);
            let timing = format!("D:{:.3}s", frame.duration.as_secs_f64());
            draw_text_mut(&mut img, TEXT_COLOR, 4, 4 + TEXT_LINE_HEIGHT, scale, font, &timing);
        }

        let path = self.dir.join(format!("frame_{index:08}.png"));
        img.save(&path)
            .with_context(|| format!("failed to save debug frame to {}", path.display()))?;

        debug!(?path, "saved debug frame");
        Ok(path)
    }

    /// Dump every frame, logging and skipping any that fail to write.
    pub fn save_all(&self, frames: &[Frame]) {
        for (index, frame) in frames.iter().enumerate() {
            if let Err(e) = self.save_frame(index, frame) {
                warn!(frame_number = index, error = %e, "failed to write debug frame");
            }
        }
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!(?path, error = %e, "failed to read font file");
            return None;
        }
    };
    match FontVec::try_from_vec(data) {
        Ok(font) => {
            info!(?path, "loaded debug font");
            Some(font)
        }
        Err(e) => {
            warn!(?path, error = %e, "failed to parse font file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;
    use tracing_test::traced_test;

    use super::*;
    use crate::time::Rational;

    #[test]
    #[traced_test]
    fn writes_frames_with_bounds_outline() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer = DebugRenderer::new(tmp.path().join("frames"), None).unwrap();

        let mut image = RgbaImage::new(20, 20);
        for y in 5..10 {
            for x in 4..12 {
                image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let frames = vec![
            Frame::new(image, Rational::from_millis(50)),
            Frame::new(RgbaImage::new(20, 20), Rational::from_millis(50)),
        ];
        renderer.save_all(&frames);

        let saved = image::open(renderer.dir().join("frame_00000000.png"))
            .unwrap()
            .into_rgba8();
        assert_eq!(*saved.get_pixel(4, 5), BOUNDS_COLOR);
        assert_eq!(*saved.get_pixel(11, 9), BOUNDS_COLOR);
        assert_eq!(saved.get_pixel(0, 0)[3], 0);
        assert!(renderer.dir().join("frame_00000001.png").exists());
        assert!(logs_contain("frame is fully transparent"));
    }

    #[test]
    #[traced_test]
    fn missing_font_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let renderer =
            DebugRenderer::new(tmp.path(), Some(Path::new("/nonexistent/font.ttf"))).unwrap();
        assert!(renderer.font.is_none());
        assert!(logs_contain("failed to read font file"));
    }
}
