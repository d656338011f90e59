use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use super::source::{FrameSource, SourceFrame, SourceInfo};
use crate::time::Rational;

/// Oldest ffmpeg release that understands `-fps_mode`.
const MIN_FFMPEG_VERSION: &str = "5.1";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    frames: Vec<ProbeFrame>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    time_base: Option<String>,
    duration_ts: Option<i64>,
    r_frame_rate: Option<String>,
    tags: Option<ProbeTags>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees. The display matrix wins over the legacy
    /// `rotate` tag.
    fn rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find_map(|d| d.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.rotate.as_deref())
                    .and_then(|r| r.trim().parse().ok())
            })
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ProbeFrame {
    best_effort_timestamp: Option<i64>,
    pkt_dts: Option<i64>,
    duration: Option<i64>,
    pkt_duration: Option<i64>,
}

/// Stream metadata and per-frame timing obtained from ffprobe.
///
/// `info` carries the displayed size, which is what ffmpeg emits once it has
/// applied the stream's rotation.
struct ProbeResult {
    info: SourceInfo,
    format_name: String,
    time_base: Rational,
    fallback_duration: Rational,
    frames: Vec<ProbeFrame>,
}

fn probe(ffprobe: &Path, path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video with ffprobe");

    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries",
            "stream=width,height,nb_frames,time_base,duration_ts,r_frame_rate\
             :stream_tags=rotate:stream_side_data=rotation\
             :format=duration,format_name\
             :frame=best_effort_timestamp,pkt_dts,duration,pkt_duration",
            "-of", "json",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe, is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {}", stderr.trim());
    }

    let parsed: ProbeOutput =
        serde_json::from_slice(&output.stdout).context("failed to parse ffprobe output")?;
    parse_probe(parsed)
}

fn parse_probe(parsed: ProbeOutput) -> Result<ProbeResult> {
    let stream = parsed.streams.first().context("no video stream found")?;

    let coded_width = stream.width.context("video stream has no width")?;
    let coded_height = stream.height.context("video stream has no height")?;
    if coded_width == 0 || coded_height == 0 {
        bail!("invalid video dimensions: {coded_width}x{coded_height}");
    }

    // ffmpeg autorotates, so quarter turns come out transposed.
    let rotation = stream.rotation();
    let quarter_turns = (rotation / 90.0).round() as i64;
    let (width, height) = if quarter_turns.rem_euclid(2) == 1 {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let time_base: Rational = stream
        .time_base
        .as_deref()
        .context("video stream has no time base")?
        .parse()
        .context("invalid stream time base")?;
    if time_base.is_zero() {
        bail!("stream time base is 0");
    }

    // Containers such as webm don't declare a frame count; fall back to
    // counting what the demuxer saw.
    let frame_count = match stream.nb_frames.as_deref().map(str::parse::<usize>) {
        Some(Ok(n)) if n > 0 => n,
        _ => parsed.frames.len(),
    };

    let duration = stream
        .duration_ts
        .and_then(|ts| u64::try_from(ts).ok())
        .map(|ts| time_base.mul_int(ts))
        .filter(|d| !d.is_zero())
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|f| f.duration.as_deref())
                .and_then(parse_decimal_secs)
        });

    let fallback_duration = stream
        .r_frame_rate
        .as_deref()
        .and_then(|r| r.parse::<Rational>().ok())
        .and_then(|fps| Rational::from_int(1).checked_div(fps))
        .unwrap_or(Rational::ZERO);

    let format_name = parsed
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .and_then(|n| n.split(',').next())
        .unwrap_or("video")
        .to_string();

    info!(
        width,
        height,
        rotation,
        frame_count,
        %time_base,
        duration = ?duration.map(Rational::as_secs_f64),
        format_name = %format_name,
        "probe completed"
    );

    Ok(ProbeResult {
        info: SourceInfo {
            width,
            height,
            frame_count,
            duration,
        },
        format_name,
        time_base,
        fallback_duration,
        frames: parsed.frames,
    })
}

/// Parse ffprobe's fixed-point seconds ("4.000000") without going through f64.
fn parse_decimal_secs(s: &str) -> Option<Rational> {
    let s = s.trim();
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    let frac = &frac[..frac.len().min(9)];
    let scale = 10u64.pow(frac.len() as u32);
    let int: u64 = int.parse().ok()?;
    let frac: u64 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    Rational::new(int.checked_mul(scale)?.checked_add(frac)?, scale).filter(|d| !d.is_zero())
}

/// Where the ffprobe and ffmpeg executables are found.
#[derive(Debug, Clone)]
struct Binaries {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// Decodes video frames by piping raw RGBA data from the ffmpeg CLI.
///
/// The container bytes are spilled to a temporary file so that ffmpeg can
/// seek, which formats with a trailing index (mp4 without faststart) need.
/// ffmpeg's stderr is drained on its own thread so a chatty decoder never
/// blocks on a full pipe.
pub struct VideoDecoder {
    // Declared first so the child is reaped before the file is removed.
    child: Child,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    _input: NamedTempFile,
    info: SourceInfo,
    format_name: String,
    time_base: Rational,
    fallback_duration: Rational,
    timings: VecDeque<ProbeFrame>,
    frame_bytes: usize,
    frame_count: u32,
}

impl VideoDecoder {
    /// Open an in-memory video container for decoding.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::open(data, &Binaries::default())
    }

    fn open(data: &[u8], binaries: &Binaries) -> Result<Self> {
        let mut input = NamedTempFile::new().context("failed to create temporary input file")?;
        input
            .write_all(data)
            .and_then(|_| input.flush())
            .context("failed to write temporary input file")?;

        let probed = probe(&binaries.ffprobe, input.path())?;
        if probed.info.frame_count == 0 {
            bail!("video stream reports no frames");
        }

        info!(path = ?input.path(), "spawning ffmpeg decoder process");

        let mut child = Command::new(&binaries.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(input.path())
            .args([
                "-map", "0:v:0",
                "-fps_mode", "passthrough",
                "-f", "rawvideo",
                "-pix_fmt", "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to spawn ffmpeg, is ffmpeg {MIN_FFMPEG_VERSION} or newer installed?"
                )
            })?;

        let mut stderr = child
            .stderr
            .take()
            .context("ffmpeg stderr was not captured")?;
        let stderr_drain = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        let frame_bytes = probed.info.width as usize * probed.info.height as usize * 4;

        info!(
            width = probed.info.width,
            height = probed.info.height,
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            stderr_drain: Some(stderr_drain),
            _input: input,
            info: probed.info,
            format_name: probed.format_name,
            time_base: probed.time_base,
            fallback_duration: probed.fallback_duration,
            timings: probed.frames.into(),
            frame_bytes,
            frame_count: 0,
        })
    }

    /// Fill `buf` with one raw frame. Returns `false` on a clean end of stream.
    fn read_frame_bytes(&mut self, buf: &mut [u8]) -> Result<bool> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .context("ffmpeg stdout not available")?;

        let mut read = 0;
        while read < buf.len() {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        return Ok(false);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = buf.len(),
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes)",
                        buf.len()
                    );
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        let stderr = self.join_stderr();
        if status.success() {
            if let Some(last) = stderr.trim().lines().last() {
                warn!(
                    stderr_bytes = stderr.len(),
                    last_line = last,
                    "ffmpeg reported problems while decoding"
                );
            }
            info!(total_frames = self.frame_count, "video stream ended");
            return Ok(());
        }

        error!(%stderr, ?status, "ffmpeg exited with an error");
        bail!(decode_failure(&stderr))
    }

    /// Collect whatever ffmpeg wrote to stderr. Returns once the pipe closes.
    fn join_stderr(&mut self) -> String {
        let Some(handle) = self.stderr_drain.take() else {
            return String::new();
        };
        match handle.join() {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(e)) => {
                warn!(%e, "failed to read ffmpeg stderr");
                String::new()
            }
            Err(_) => {
                warn!("ffmpeg stderr reader panicked");
                String::new()
            }
        }
    }

    fn frame_duration(&self, timing: Option<&ProbeFrame>) -> Rational {
        timing
            .and_then(|t| t.duration.or(t.pkt_duration))
            .and_then(|d| u64::try_from(d).ok())
            .filter(|&d| d > 0)
            .map(|d| self.time_base.mul_int(d))
            .unwrap_or(self.fallback_duration)
    }
}

fn decode_failure(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.contains("Unrecognized option") || stderr.contains("Option not found") {
        format!("ffmpeg decode failed (ffmpeg {MIN_FFMPEG_VERSION} or newer is required): {stderr}")
    } else {
        format!("ffmpeg decode failed: {stderr}")
    }
}

impl FrameSource for VideoDecoder {
    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        let mut buf = vec![0u8; self.frame_bytes];
        if !self.read_frame_bytes(&mut buf)? {
            self.finish()?;
            return Ok(None);
        }

        let image = RgbaImage::from_raw(self.info.width, self.info.height, buf)
            .context("failed to create RgbaImage from raw frame data")?;

        let timing = self.timings.pop_front();
        if timing.is_none() {
            warn!(
                frame_number = self.frame_count,
                "ffmpeg produced more frames than ffprobe reported"
            );
        }
        let timestamp = timing.and_then(|t| t.best_effort_timestamp.or(t.pkt_dts));
        let duration = self.frame_duration(timing.as_ref());

        debug!(
            frame_number = self.frame_count,
            ?timestamp,
            duration = %duration,
            "decoded frame"
        );
        self.frame_count += 1;

        Ok(Some(SourceFrame {
            image,
            timestamp,
            duration,
        }))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        debug!(total_frames = self.frame_count, "closing video decoder");
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_stderr();
    }
}
