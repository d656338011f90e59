use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::error::{DecodingError, ImageFormatHint};
use image::{AnimationDecoder, Frames, ImageDecoder, ImageError, ImageFormat, ImageResult};
use tracing::{debug, info};

use super::source::{FrameSource, SourceFrame, SourceInfo};
use crate::time::Rational;

/// What an image container holds, read without decoding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
}

impl ImageProbe {
    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    pub fn format_name(&self) -> &'static str {
        format_name(self.format)
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("image")
}

/// Identify the image format and count its frames from container headers.
///
/// Only headers are read, so resolution checks on the result run before any
/// pixel data is decoded.
pub fn probe_image(data: &[u8]) -> ImageResult<ImageProbe> {
    let format = image::guess_format(data)?;

    let ((width, height), frame_count) = match format {
        ImageFormat::Gif => {
            let decoder = GifDecoder::new(Cursor::new(data))?;
            (decoder.dimensions(), count_gif_frames(data)?)
        }
        ImageFormat::WebP => webp_header(data)?,
        ImageFormat::Png => png_header(data)?,
        _ => (image::ImageReader::with_format(Cursor::new(data), format).into_dimensions()?, 1),
    };

    debug!(?format, width, height, frame_count, "image probed");

    Ok(ImageProbe {
        format,
        width,
        height,
        frame_count,
    })
}

fn decoding_error(
    format: ImageFormat,
    err: impl std::error::Error + Send + Sync + 'static,
) -> ImageError {
    ImageError::Decoding(DecodingError::new(ImageFormatHint::Exact(format), err))
}

/// GIF frames can be counted without LZW-decoding their pixel data.
fn count_gif_frames(data: &[u8]) -> ImageResult<usize> {
    let gif_err = |err: gif::DecodingError| decoding_error(ImageFormat::Gif, err);

    let mut options = gif::DecodeOptions::new();
    options.skip_frame_decoding(true);
    let mut decoder = options.read_info(Cursor::new(data)).map_err(gif_err)?;

    let mut count = 0;
    while decoder.read_next_frame().map_err(gif_err)?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Dimensions and the `acTL` frame count, read up to the first image chunk.
fn png_header(data: &[u8]) -> ImageResult<((u32, u32), usize)> {
    let reader = png::Decoder::new(Cursor::new(data))
        .read_info()
        .map_err(|err| decoding_error(ImageFormat::Png, err))?;
    let info = reader.info();

    let frame_count = info
        .animation_control
        .as_ref()
        .map_or(1, |control| control.num_frames.max(1) as usize);
    Ok(((info.width, info.height), frame_count))
}

/// Dimensions and the number of `ANMF` chunks in the RIFF index.
fn webp_header(data: &[u8]) -> ImageResult<((u32, u32), usize)> {
    let decoder = image_webp::WebPDecoder::new(Cursor::new(data))
        .map_err(|err| decoding_error(ImageFormat::WebP, err))?;

    let frame_count = if decoder.is_animated() {
        (decoder.num_frames() as usize).max(1)
    } else {
        1
    };
    Ok((decoder.dimensions(), frame_count))
}

/// Decode a single still image to RGBA.
pub fn load_still(data: &[u8]) -> ImageResult<image::RgbaImage> {
    Ok(image::load_from_memory(data)?.into_rgba8())
}

/// Yields fully composited frames of an animated GIF, WebP or APNG.
pub struct AnimatedDecoder<'a> {
    format_name: &'static str,
    info: SourceInfo,
    frames: Frames<'a>,
    frame_count: i64,
}

impl<'a> AnimatedDecoder<'a> {
    pub fn new(data: &'a [u8], probe: &ImageProbe) -> Result<Self> {
        let cursor = Cursor::new(data);
        let frames = match probe.format {
            ImageFormat::Gif => GifDecoder::new(cursor)?.into_frames(),
            ImageFormat::WebP => WebPDecoder::new(cursor)?.into_frames(),
            ImageFormat::Png => PngDecoder::new(cursor)?
                .apng()
                .context("png has no animation")?
                .into_frames(),
            other => anyhow::bail!("{other:?} images cannot be animated"),
        };

        info!(
            format = probe.format_name(),
            width = probe.width,
            height = probe.height,
            frame_count = probe.frame_count,
            "animated decoder opened"
        );

        Ok(Self {
            format_name: probe.format_name(),
            info: SourceInfo {
                width: probe.width,
                height: probe.height,
                frame_count: probe.frame_count,
                duration: None,
            },
            frames,
            frame_count: 0,
        })
    }
}

impl FrameSource for AnimatedDecoder<'_> {
    fn format_name(&self) -> &str {
        self.format_name
    }

    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let Some(frame) = self.frames.next() else {
            info!(total_frames = self.frame_count, "animation ended");
            return Ok(None);
        };
        let frame = frame.with_context(|| format!("failed to decode frame {}", self.frame_count))?;

        let (numer_ms, denom_ms) = frame.delay().numer_denom_ms();
        let duration = Rational::new(numer_ms as u64, denom_ms as u64 * 1000)
            .unwrap_or(Rational::ZERO);

        debug!(frame_number = self.frame_count, duration = %duration, "decoded frame");

        let timestamp = Some(self.frame_count);
        self.frame_count += 1;

        Ok(Some(SourceFrame {
            image: frame.into_buffer(),
            timestamp,
            duration,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    /// Encode solid-colour frames as a GIF, delays in hundredths of a second.
    pub(crate) fn gif_bytes(width: u16, height: u16, frames: &[([u8; 4], u16)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut buf, width, height, &[]).unwrap();
            encoder.set_repeat(gif::Repeat::Infinite).unwrap();
            for &(color, delay) in frames {
                let mut pixels = RgbaImage::from_pixel(width as u32, height as u32, Rgba(color))
                    .into_raw();
                let mut frame = gif::Frame::from_rgba_speed(width, height, &mut pixels, 30);
                frame.delay = delay;
                encoder.write_frame(&frame).unwrap();
            }
        }
        buf
    }

    /// Encode solid-colour frames as an APNG, 100 ms apart.
    pub(crate) fn apng_bytes(width: u32, height: u32, colors: &[[u8; 4]]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_animated(colors.len() as u32, 0).unwrap();
            let mut writer = encoder.write_header().unwrap();
            for &color in colors {
                writer.set_frame_delay(1, 10).unwrap();
                let pixels = RgbaImage::from_pixel(width, height, Rgba(color)).into_raw();
                writer.write_image_data(&pixels).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    /// Scramble the compressed payload of the first `fdAT` chunk.
    pub(crate) fn corrupt_first_fdat(data: &mut [u8]) {
        let pos = data.windows(4).position(|w| w == b"fdAT").unwrap();
        for byte in &mut data[pos + 8..pos + 12] {
            *byte ^= 0xA5;
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn probe_counts_gif_frames() {
        let data = gif_bytes(
            8,
            6,
            &[([255, 0, 0, 255], 10), ([0, 255, 0, 255], 10), ([0, 0, 255, 255], 5)],
        );
        let probe = probe_image(&data).unwrap();
        assert_eq!(probe.format, ImageFormat::Gif);
        assert_eq!((probe.width, probe.height), (8, 6));
        assert_eq!(probe.frame_count, 3);
        assert!(probe.is_animated());
        assert_eq!(probe.format_name(), "gif");
    }

    #[test]
    fn probe_treats_png_as_still() {
        let data = png_bytes(40, 30);
        let probe = probe_image(&data).unwrap();
        assert_eq!(probe.format, ImageFormat::Png);
        assert_eq!((probe.width, probe.height), (40, 30));
        assert!(!probe.is_animated());
        assert_eq!(load_still(&data).unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn apng_frames_are_counted_from_the_header() {
        let mut data = apng_bytes(30, 20, &[[255, 0, 0, 255], [0, 0, 255, 255]]);
        corrupt_first_fdat(&mut data);

        let probe = probe_image(&data).unwrap();
        assert_eq!(probe.format, ImageFormat::Png);
        assert_eq!((probe.width, probe.height), (30, 20));
        assert_eq!(probe.frame_count, 2);

        // The broken frame only surfaces once frames are actually decoded.
        let mut decoder = AnimatedDecoder::new(&data, &probe).unwrap();
        let mut result = Ok(None);
        for _ in 0..probe.frame_count {
            result = decoder.next_frame();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn apng_decodes_every_frame() {
        let data = apng_bytes(6, 4, &[[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]]);
        let probe = probe_image(&data).unwrap();
        assert_eq!(probe.frame_count, 3);

        let mut decoder = AnimatedDecoder::new(&data, &probe).unwrap();
        let mut colors = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            assert_eq!(frame.duration, Rational::from_millis(100));
            colors.push(frame.image.get_pixel(0, 0).0);
        }
        assert_eq!(colors, vec![[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]]);
    }

    #[test]
    fn probe_rejects_garbage() {
        assert!(probe_image(b"definitely not an image").is_err());
    }

    #[test]
    fn decoder_yields_frames_with_native_delays() {
        let data = gif_bytes(
            4,
            4,
            &[([255, 0, 0, 255], 10), ([0, 255, 0, 255], 0), ([0, 0, 255, 255], 7)],
        );
        let probe = probe_image(&data).unwrap();
        let mut decoder = AnimatedDecoder::new(&data, &probe).unwrap();
        assert_eq!(decoder.info().frame_count, 3);

        let mut durations = Vec::new();
        while let Some(frame) = decoder.next_frame().unwrap() {
            assert_eq!(frame.image.dimensions(), (4, 4));
            assert!(frame.timestamp.is_some());
            durations.push(frame.duration);
        }

        assert_eq!(
            durations,
            vec![
                Rational::from_millis(100),
                Rational::ZERO,
                Rational::from_millis(70),
            ]
        );
    }
}
