//! Encoding of a transformed frame sequence back into a single artifact.

use std::io::Cursor;

use anyhow::{anyhow, Context};
use gif::{DisposalMethod, Encoder, Repeat};
use image::{imageops, ImageFormat, RgbaImage};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::rect::opaque_bounds;
use crate::video::{Frame, FrameSequence};

/// GIF delays are expressed in hundredths of a second.
const GIF_DELAY_UNITS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Gif,
}

impl OutputFormat {
    pub fn file_extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
        }
    }
}

/// An encoded artifact ready to be attached to a reply.
#[derive(Debug, Clone)]
pub struct Output {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl Output {
    /// A short random attachment name with the matching extension, e.g.
    /// `3f9a0c12be.gif`.
    pub fn random_file_name(&self) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}.{}", &id[..10], self.format.file_extension())
    }
}

/// Encode a single image as PNG.
pub fn encode_png(image: &RgbaImage) -> MediaResult<Vec<u8>> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .context("failed to encode png")
        .map_err(MediaError::Recompose)?;
    debug!(bytes = buf.len(), "png encoded");
    Ok(buf)
}

/// Encode every frame of `seq` into a looping GIF.
///
/// Each frame keeps its own size on a transparent backing and uses
/// "restore to background" disposal. `speed` is the palette quantization
/// speed (1..=30). With `optimize`, frames are cropped to their visible
/// pixels.
pub fn encode_gif(seq: &FrameSequence, speed: i32, optimize: bool) -> MediaResult<Vec<u8>> {
    encode_gif_frames(seq.frames(), speed, optimize).map_err(MediaError::Recompose)
}

fn encode_gif_frames(frames: &[Frame], speed: i32, optimize: bool) -> anyhow::Result<Vec<u8>> {
    if frames.is_empty() {
        anyhow::bail!("cannot encode an empty sequence");
    }

    let screen_w = frames.iter().map(Frame::width).max().unwrap_or(1);
    let screen_h = frames.iter().map(Frame::height).max().unwrap_or(1);
    let (screen_w, screen_h) = gif_dimensions(screen_w, screen_h)?;
    let speed = speed.clamp(1, 30);

    info!(
        framecount = frames.len(),
        screen_w,
        screen_h,
        speed,
        optimize,
        "encoding gif"
    );

    let mut buf = Vec::new();
    {
        let mut encoder =
            Encoder::new(&mut buf, screen_w, screen_h, &[]).context("failed to start gif")?;
        encoder
            .set_repeat(Repeat::Infinite)
            .context("failed to set gif loop count")?;

        for (index, frame) in frames.iter().enumerate() {
            let mut gif_frame = gif_frame(frame, speed, optimize)
                .with_context(|| format!("failed to quantize frame {index}"))?;
            gif_frame.dispose = DisposalMethod::Background;
            gif_frame.delay = gif_delay(frame);

            debug!(
                frame_number = index,
                delay = gif_frame.delay,
                left = gif_frame.left,
                top = gif_frame.top,
                width = gif_frame.width,
                height = gif_frame.height,
                "writing gif frame"
            );

            encoder
                .write_frame(&gif_frame)
                .with_context(|| format!("failed to write frame {index}"))?;
        }
    }

    info!(bytes = buf.len(), "gif encoded");
    Ok(buf)
}

/// Composite `frame` onto a transparent canvas of its own size and quantize
/// it, optionally cropped to the opaque region.
fn gif_frame(frame: &Frame, speed: i32, optimize: bool) -> anyhow::Result<gif::Frame<'static>> {
    let mut canvas = RgbaImage::new(frame.width(), frame.height());
    imageops::overlay(&mut canvas, &frame.image, 0, 0);

    let (left, top, mut image) = if optimize {
        match opaque_bounds(&canvas) {
            Some(r) => (
                r.x,
                r.y,
                imageops::crop_imm(&canvas, r.x, r.y, r.w, r.h).to_image(),
            ),
            None => (0, 0, RgbaImage::new(1, 1)),
        }
    } else {
        (0, 0, canvas)
    };

    let (w, h) = gif_dimensions(image.width(), image.height())?;
    let mut out = gif::Frame::from_rgba_speed(w, h, &mut image, speed);
    out.left = u16::try_from(left).map_err(|_| anyhow!("frame offset {left} out of range"))?;
    out.top = u16::try_from(top).map_err(|_| anyhow!("frame offset {top} out of range"))?;
    Ok(out)
}

fn gif_delay(frame: &Frame) -> u16 {
    let units = frame.duration.round_to_units(GIF_DELAY_UNITS);
    u16::try_from(units).unwrap_or(u16::MAX)
}

fn gif_dimensions(width: u32, height: u32) -> anyhow::Result<(u16, u16)> {
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(anyhow!("{width}x{height} cannot be stored in a gif")),
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;
    use tracing_test::traced_test;

    use super::*;
    use crate::time::Rational;
    use crate::video::SequenceKind;

    struct Decoded {
        delay: u16,
        dispose: DisposalMethod,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    }

    fn decode(bytes: &[u8]) -> (u16, u16, Vec<Decoded>) {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(Cursor::new(bytes)).unwrap();
        let (w, h) = (decoder.width(), decoder.height());
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push(Decoded {
                delay: frame.delay,
                dispose: frame.dispose,
                left: frame.left,
                top: frame.top,
                width: frame.width,
                height: frame.height,
            });
        }
        (w, h, frames)
    }

    fn frame(w: u32, h: u32, rgba: [u8; 4], ms: u64) -> Frame {
        Frame::new(RgbaImage::from_pixel(w, h, Rgba(rgba)), Rational::from_millis(ms))
    }

    #[test]
    #[traced_test]
    fn round_trip_keeps_count_delays_and_disposal() {
        let seq = FrameSequence::new(
            SequenceKind::Animated,
            40,
            30,
            vec![
                frame(40, 30, [255, 0, 0, 255], 100),
                frame(40, 30, [0, 255, 0, 255], 40),
                frame(40, 30, [0, 0, 255, 255], 1000),
            ],
        );
        let bytes = encode_gif(&seq, 10, false).unwrap();
        let (w, h, frames) = decode(&bytes);

        assert_eq!((w, h), (40, 30));
        assert_eq!(frames.len(), 3);
        let delays: Vec<u16> = frames.iter().map(|f| f.delay).collect();
        assert_eq!(delays, vec![10, 4, 100]);
        assert!(frames.iter().all(|f| f.dispose == DisposalMethod::Background));
        assert!(logs_contain("gif encoded"));
    }

    #[test]
    fn delays_round_to_nearest_hundredth() {
        let third = Frame::new(RgbaImage::new(1, 1), Rational::new(1, 30).unwrap());
        let half = Frame::new(RgbaImage::new(1, 1), Rational::from_millis(25));
        assert_eq!(gif_delay(&third), 3);
        assert_eq!(gif_delay(&half), 3);
        let huge = Frame::new(RgbaImage::new(1, 1), Rational::from_int(100_000));
        assert_eq!(gif_delay(&huge), u16::MAX);
    }

    #[test]
    fn frames_keep_native_size() {
        let seq = FrameSequence::new(
            SequenceKind::Video,
            20,
            20,
            vec![
                frame(20, 20, [9, 9, 9, 255], 50),
                frame(12, 8, [9, 9, 9, 255], 50),
            ],
        );
        let (w, h, frames) = decode(&encode_gif(&seq, 10, false).unwrap());
        assert_eq!((w, h), (20, 20));
        assert_eq!((frames[1].width, frames[1].height), (12, 8));
    }

    #[test]
    fn optimized_frames_are_cropped_to_visible_pixels() {
        let mut image = RgbaImage::new(32, 32);
        for y in 10..14 {
            for x in 5..9 {
                image.put_pixel(x, y, Rgba([200, 10, 10, 255]));
            }
        }
        let seq = FrameSequence::new(
            SequenceKind::Animated,
            32,
            32,
            vec![
                Frame::new(image, Rational::from_millis(50)),
                frame(32, 32, [0, 0, 0, 0], 50),
            ],
        );
        let (w, h, frames) = decode(&encode_gif(&seq, 10, true).unwrap());

        assert_eq!((w, h), (32, 32));
        let first = &frames[0];
        assert_eq!((first.left, first.top, first.width, first.height), (5, 10, 4, 4));
        let empty = &frames[1];
        assert_eq!((empty.left, empty.top, empty.width, empty.height), (0, 0, 1, 1));
        assert!(frames.iter().all(|f| f.dispose == DisposalMethod::Background));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let seq = FrameSequence::new(
            SequenceKind::Animated,
            70_000,
            1,
            vec![frame(70_000, 1, [0, 0, 0, 255], 50)],
        );
        assert!(matches!(encode_gif(&seq, 10, false), Err(MediaError::Recompose(_))));
    }

    #[test]
    fn png_still_decodes_back() {
        let image = RgbaImage::from_pixel(6, 4, Rgba([1, 2, 3, 128]));
        let bytes = encode_png(&image).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().into_rgba8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn output_naming() {
        let output = Output {
            bytes: Vec::new(),
            format: OutputFormat::Gif,
        };
        let name = output.random_file_name();
        assert_eq!(name.len(), 14);
        assert!(name.ends_with(".gif"));
        assert!(name[..10].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
    }
}
