pub mod animated;
pub mod decoder;
pub mod frame;
pub mod source;

pub use frame::{Frame, FrameSequence, SequenceKind};
pub use source::{FrameSource, SourceFrame, SourceInfo};
