mod cli;
mod remover;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cutout_core::debug::DebugRenderer;
use cutout_core::progress::ProgressEvent;
use cutout_core::{FrameTransform, MediaInput, MediaKind, Output, Passthrough, Pipeline};

use crate::remover::CommandTransform;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Strip {
            input,
            output,
            remover,
            config,
            max_frames,
            mse_strength,
            debug_frames,
            debug_font,
        } => {
            info!(?input, ?output, remover = %remover, "starting background removal");

            let mut media = settings::load(config.as_deref())?;
            if let Some(max_frames) = max_frames {
                media.max_frames = max_frames;
            }
            if let Some(mse_strength) = mse_strength {
                media.mse_strength = mse_strength;
            }

            let mut pipeline = Pipeline::new(media).context("invalid settings")?;
            if let Some(dir) = debug_frames {
                let renderer = DebugRenderer::new(dir, debug_font.as_deref())?;
                pipeline = pipeline.with_debug_renderer(renderer);
            }

            let transform: Arc<dyn FrameTransform> = if remover == "none" {
                Arc::new(Passthrough)
            } else {
                Arc::new(CommandTransform::parse(&remover)?)
            };

            let bytes = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let kind = match MediaKind::detect(&bytes) {
                Ok(kind) => kind,
                Err(e) => bail!("{}", e.user_message()),
            };
            info!(kind = kind.as_str(), bytes = bytes.len(), "input loaded");

            let (sink, rx) = pipeline.progress_channel();
            let progress = tokio::spawn(log_progress(rx));

            let result = pipeline
                .run(MediaInput { bytes, kind }, transform, Some(sink))
                .await;
            if let Err(e) = progress.await {
                warn!(error = %e, "progress logger failed");
            }

            let out = match result {
                Ok(out) => out,
                Err(e) if e.is_rejection() => {
                    warn!(error = %e, "input rejected");
                    bail!("{}", e.user_message());
                }
                Err(e) => return Err(e).context("pipeline failed"),
            };

            let path = output_path(&output, &out);
            write_output(&out, &path)?;

            info!(
                ?path,
                format = out.format.file_extension(),
                suggested_name = %out.random_file_name(),
                "background removal complete"
            );
            Ok(())
        }
    }
}

async fn log_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            frame = event.index + 1,
            total = event.total,
            preview_bytes = event.preview.as_ref().map_or(0, Vec::len),
            "frame processed"
        );
    }
}

/// `output` with its extension replaced by the produced format's.
fn output_path(output: &Path, out: &Output) -> PathBuf {
    let ext = out.format.file_extension();
    if output.extension().is_some_and(|e| e != ext) {
        warn!(?output, ext, "output extension does not match format, replacing it");
    }
    output.with_extension(ext)
}

fn write_output(out: &Output, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create output directory")?;
    }

    std::fs::write(path, &out.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!(?path, bytes = out.bytes.len(), mime = out.format.mime_type(), "output written");
    Ok(())
}
