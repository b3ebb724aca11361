//! Audio sources and frame layout
//!
//! Decoding itself happens in an external process; this module only spawns
//! it, slices its PCM output into fixed-size frames and classifies source
//! references.

pub mod process;
pub mod source;
pub mod types;

pub use process::{ProcessSource, ProcessSourceFactory};
pub use source::{FrameSource, SearchProvider, SourceFactory, SourceKind};
pub use types::{AudioFrame, FrameFormat};
