//! # Chorus Common Library
//!
//! Shared code for the Chorus voice playback services:
//! - Event types (`VoiceEvent` enum) and the engine state enum
//! - Shared error type
//! - Bootstrap configuration file discovery and loading
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EngineState, VoiceEvent};
