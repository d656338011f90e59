pub mod collapse;
pub mod config;
pub mod debug;
pub mod decompose;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod recompose;
pub mod rect;
pub mod time;
pub mod transform;
pub mod validate;
pub mod video;

pub use config::MediaConfig;
pub use error::{MediaError, MediaResult};
pub use pipeline::{MediaInput, MediaKind, Pipeline};
pub use recompose::{Output, OutputFormat};
pub use transform::{FrameTransform, Passthrough};
