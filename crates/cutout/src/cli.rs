use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cutout", about = "Background remover for images, animations and videos")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Remove the background from every frame of a media file.
    Strip {
        /// Path to the input image, animation or video.
        #[arg(short, long)]
        input: PathBuf,

        /// Path to write the result. The extension is replaced to match the
        /// produced format (png or gif).
        #[arg(short, long)]
        output: PathBuf,

        /// Command that reads a PNG on stdin and writes the cut-out PNG on
        /// stdout. "none" leaves frames untouched.
        #[arg(short, long, default_value = "rembg i - -")]
        remover: String,

        /// Settings file (TOML, YAML or JSON). CUTOUT_* environment variables
        /// override it.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the frame budget.
        #[arg(long)]
        max_frames: Option<usize>,

        /// Override the duplicate-frame MSE threshold.
        #[arg(long)]
        mse_strength: Option<f64>,

        /// Directory to save transformed frames with their visible region outlined.
        #[arg(long)]
        debug_frames: Option<PathBuf>,

        /// Font used to label debug frames.
        #[arg(long, requires = "debug_frames")]
        debug_font: Option<PathBuf>,
    },
}
