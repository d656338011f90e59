//! The Decompose -> Collapse -> Transform -> Recompose chain.
//!
//! [`run_blocking`] drives one request synchronously. [`Pipeline`] runs it on
//! tokio's blocking pool, bounded by a shared permit count.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use crate::collapse::collapse_duplicates;
use crate::config::MediaConfig;
use crate::debug::DebugRenderer;
use crate::decompose::{decompose_animated, decompose_video, video_frame_budget};
use crate::error::{MediaError, MediaResult};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::recompose::{encode_gif, encode_png, Output, OutputFormat};
use crate::transform::{apply_transform, FrameTransform};
use crate::validate::{check_frame_count, check_resolution};
use crate::video::animated::{load_still, probe_image, AnimatedDecoder};
use crate::video::decoder::VideoDecoder;
use crate::video::{FrameSequence, FrameSource, SourceFrame, SourceInfo};

/// Marker error raised inside a cancelled run.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared flag telling a blocking run to stop at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// A guard that cancels this token when dropped.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

pub struct CancelGuard(CancelToken);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Checks the token before every frame pulled from the wrapped source.
struct Cancellable<'a, S: ?Sized> {
    inner: &'a mut S,
    token: &'a CancelToken,
}

impl<S: FrameSource + ?Sized> FrameSource for Cancellable<'_, S> {
    fn format_name(&self) -> &str {
        self.inner.format_name()
    }

    fn info(&self) -> SourceInfo {
        self.inner.info()
    }

    fn next_frame(&mut self) -> Result<Option<SourceFrame>> {
        if self.token.is_cancelled() {
            return Err(Cancelled.into());
        }
        self.inner.next_frame()
    }
}

/// What the download layer says the bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Sniff the kind from magic bytes.
    pub fn detect(bytes: &[u8]) -> MediaResult<Self> {
        if image::guess_format(bytes).is_ok() {
            return Ok(MediaKind::Image);
        }
        if is_video_container(bytes) {
            return Ok(MediaKind::Video);
        }
        Err(MediaError::UnsupportedInput("unknown".into()))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

fn is_video_container(bytes: &[u8]) -> bool {
    let iso_bmff = bytes.get(4..8) == Some(&b"ftyp"[..]);
    let matroska = bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]);
    let avi = bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(&b"AVI "[..]);
    let mpeg_ts = bytes.first() == Some(&0x47) && bytes.get(188) == Some(&0x47);
    iso_bmff || matroska || avi || mpeg_ts
}

#[derive(Debug, Clone)]
pub struct MediaInput {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

/// Optional observers and controls for one run.
#[derive(Default)]
pub struct RunHooks {
    pub progress: Option<ProgressSink>,
    pub cancel: CancelToken,
    pub debug: Option<Arc<DebugRenderer>>,
}

/// Run the whole chain for one input on the current thread.
pub fn run_blocking(
    input: &MediaInput,
    config: &MediaConfig,
    transform: &dyn FrameTransform,
    hooks: &RunHooks,
) -> MediaResult<Output> {
    info!(
        kind = input.kind.as_str(),
        bytes = input.bytes.len(),
        "pipeline starting"
    );

    let (format, mut seq) = match input.kind {
        MediaKind::Image => decompose_image_input(&input.bytes, config, &hooks.cancel)?,
        MediaKind::Video => decompose_video_input(&input.bytes, config, &hooks.cancel)?,
    };

    if seq.framecount() > 1 {
        collapse_duplicates(&mut seq, config.mse_strength);
        check_frame_count(&format, seq.framecount(), config.max_frames)?;
    }

    apply_transform(
        &mut seq,
        transform,
        hooks.progress.as_ref(),
        Some(&hooks.cancel),
    )?;

    if let Some(renderer) = &hooks.debug {
        renderer.save_all(seq.frames());
    }

    if hooks.cancel.is_cancelled() {
        return Err(MediaError::Cancelled);
    }

    let output = recompose(&seq, config)?;
    info!(
        format = output.format.file_extension(),
        framecount = seq.framecount(),
        bytes = output.bytes.len(),
        "pipeline complete"
    );
    Ok(output)
}

fn decompose_image_input(
    bytes: &[u8],
    config: &MediaConfig,
    cancel: &CancelToken,
) -> MediaResult<(String, FrameSequence)> {
    let probe = probe_image(bytes)?;
    let format = probe.format_name().to_owned();
    check_resolution(&format, probe.width, probe.height, probe.frame_count, config)?;

    if !probe.is_animated() {
        let image = load_still(bytes)?;
        info!(
            format = %format,
            width = image.width(),
            height = image.height(),
            "still image loaded"
        );
        return Ok((format, FrameSequence::still(image)));
    }

    let mut decoder =
        AnimatedDecoder::new(bytes, &probe).map_err(MediaError::ImageDecomposition)?;
    let mut source = Cancellable {
        inner: &mut decoder,
        token: cancel,
    };
    let seq = decompose_animated(&mut source, config.max_frames, config.min_frame_delay_ms)?;
    Ok((format, seq))
}

fn decompose_video_input(
    bytes: &[u8],
    config: &MediaConfig,
    cancel: &CancelToken,
) -> MediaResult<(String, FrameSequence)> {
    let mut decoder = VideoDecoder::from_bytes(bytes).map_err(MediaError::VideoDecomposition)?;
    decompose_video_source(&mut decoder, config, cancel)
}

/// Check an opened video's declared size, then sample it within the frame
/// and fps budgets.
fn decompose_video_source<S: FrameSource + ?Sized>(
    decoder: &mut S,
    config: &MediaConfig,
    cancel: &CancelToken,
) -> MediaResult<(String, FrameSequence)> {
    let info = decoder.info();
    let format = decoder.format_name().to_owned();
    check_resolution(&format, info.width, info.height, info.frame_count, config)?;

    let budget = video_frame_budget(&info, config.max_frames, config.max_video_fps);
    let mut source = Cancellable {
        inner: decoder,
        token: cancel,
    };
    let seq = decompose_video(&mut source, budget)?;
    Ok((format, seq))
}

/// One frame becomes a PNG still, anything longer a GIF.
fn recompose(seq: &FrameSequence, config: &MediaConfig) -> MediaResult<Output> {
    match seq.frames() {
        [] => Err(MediaError::Recompose(anyhow::anyhow!("no frames to encode"))),
        [only] => Ok(Output {
            bytes: encode_png(&only.image)?,
            format: OutputFormat::Png,
        }),
        _ => Ok(Output {
            bytes: encode_gif(seq, config.gif_quantize_speed, config.optimize_frames)?,
            format: OutputFormat::Gif,
        }),
    }
}

/// Runs requests on the blocking pool, at most `worker_count` at a time.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<MediaConfig>,
    permits: Arc<Semaphore>,
    debug: Option<Arc<DebugRenderer>>,
}

impl Pipeline {
    pub fn new(config: MediaConfig) -> MediaResult<Self> {
        config.validate()?;
        let workers = config.worker_count();
        info!(workers, max_frames = config.max_frames, "pipeline ready");
        Ok(Self {
            config: Arc::new(config),
            permits: Arc::new(Semaphore::new(workers)),
            debug: None,
        })
    }

    pub fn with_debug_renderer(mut self, renderer: DebugRenderer) -> Self {
        self.debug = Some(Arc::new(renderer));
        self
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// A progress sink sized from the configuration.
    pub fn progress_channel(&self) -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
        ProgressSink::channel(self.config.progress_queue, self.config.preview_px)
    }

    /// Process one input. Dropping the returned future cancels the run at
    /// the next frame boundary; its permit is held until the blocking work
    /// has actually stopped.
    pub async fn run(
        &self,
        input: MediaInput,
        transform: Arc<dyn FrameTransform>,
        progress: Option<ProgressSink>,
    ) -> MediaResult<Output> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| MediaError::Worker(e.into()))?;

        let cancel = CancelToken::new();
        let _cancel_guard = cancel.drop_guard();
        let hooks = RunHooks {
            progress,
            cancel,
            debug: self.debug.clone(),
        };
        let config = self.config.clone();
        let span = tracing::Span::current();

        let result = tokio::task::spawn_blocking(move || {
            let _span = span.enter();
            let _permit = permit;
            run_blocking(&input, &config, transform.as_ref(), &hooks)
        })
        .await;

        match result {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "pipeline worker task failed");
                Err(MediaError::Worker(e.into()))
            }
        }
    }
}
