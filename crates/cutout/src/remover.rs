use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use image::{ImageFormat, RgbaImage};
use tracing::debug;

use cutout_core::FrameTransform;

/// Runs an external background remover once per frame, PNG in on stdin and
/// PNG out on stdout.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
}

impl CommandTransform {
    /// Split a whitespace-separated command line.
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_owned);
        let Some(program) = parts.next() else {
            bail!("remover command is empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl FrameTransform for CommandTransform {
    fn apply(&self, image: &RgbaImage) -> Result<RgbaImage> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("failed to encode frame for remover")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn remover '{}'", self.program))?;

        // Fed from a separate thread so a full stdout pipe cannot deadlock.
        let mut stdin = child.stdin.take().context("remover stdin not captured")?;
        let writer = std::thread::spawn(move || stdin.write_all(&png));

        let output = child
            .wait_with_output()
            .context("failed to wait for remover")?;
        let written = writer
            .join()
            .map_err(|_| anyhow!("remover stdin writer panicked"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("remover exited with {}: {}", output.status, stderr.trim());
        }
        written.context("failed to write frame to remover")?;

        let result = image::load_from_memory(&output.stdout)
            .context("remover output is not a decodable image")?
            .into_rgba8();
        debug!(
            program = %self.program,
            width = result.width(),
            height = result.height(),
            "remover finished"
        );
        Ok(result)
    }
}
