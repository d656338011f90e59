use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Everything that can go wrong between receiving media bytes and producing
/// the output artifact.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("an error occurred while loading the image")]
    ImageError(#[source] image::ImageError),

    #[error("an error occurred while decomposing the image")]
    ImageDecomposition(#[source] anyhow::Error),

    #[error("an error occurred while decomposing the video")]
    VideoDecomposition(#[source] anyhow::Error),

    #[error("{format} exceeds maximum of {max_frames} frames (frame count: {frames})")]
    ExceedsMaxFrames {
        format: String,
        frames: usize,
        max_frames: usize,
    },

    #[error("{format} needs to be <{max_px}px in width or height (resolution: {width}x{height})")]
    ExceedsMaxResolution {
        format: String,
        width: u32,
        height: u32,
        max_px: u32,
    },

    #[error("{format} needs to be >{min_px}px in width or height (resolution: {width}x{height})")]
    SubceedsMinResolution {
        format: String,
        width: u32,
        height: u32,
        min_px: u32,
    },

    #[error("background removal failed on frame {index}")]
    Transform {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to encode output")]
    Recompose(#[source] anyhow::Error),

    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("processing was cancelled")]
    Cancelled,

    #[error("worker task failed")]
    Worker(#[source] anyhow::Error),
}

impl MediaError {
    /// Validation rejections are reported to the requester as-is and are not
    /// failures of the pipeline itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ExceedsMaxFrames { .. }
                | Self::ExceedsMaxResolution { .. }
                | Self::SubceedsMinResolution { .. }
                | Self::UnsupportedInput(_)
        )
    }

    /// Multi-line wording suitable for a chat reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::ExceedsMaxFrames {
                format,
                frames,
                max_frames,
            } => format!("{format} exceeds maximum of {max_frames} frames.\nFrame Count: {frames}"),
            Self::ExceedsMaxResolution {
                format,
                width,
                height,
                max_px,
            } => format!(
                "{} needs to be <{max_px}px in width or height.\nResolution: {width}x{height}",
                format.to_uppercase()
            ),
            Self::SubceedsMinResolution {
                format,
                width,
                height,
                min_px,
            } => format!(
                "{} needs to be >{min_px}px in width or height.\nResolution: {width}x{height}",
                format.to_uppercase()
            ),
            Self::UnsupportedInput(kind) => {
                format!("Detected file type as: '{kind}', which is not supported.")
            }
            other => {
                let msg = other.to_string();
                let mut chars = msg.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>() + ".",
                    None => msg,
                }
            }
        }
    }
}

impl From<image::ImageError> for MediaError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageError(err)
    }
}
