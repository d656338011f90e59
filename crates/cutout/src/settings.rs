use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use tracing::info;

use cutout_core::MediaConfig;

/// Build the media settings from an optional file, then `CUTOUT_*`
/// environment variables. Missing keys keep their defaults.
pub fn load(path: Option<&Path>) -> Result<MediaConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("CUTOUT").try_parsing(true))
        .build()
        .context("failed to read settings")?;

    let media: MediaConfig = settings
        .try_deserialize()
        .context("failed to parse settings")?;

    info!(?path, ?media, "settings loaded");
    Ok(media)
}
