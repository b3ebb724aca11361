//! # Chorus Voice Player Library (chorus-vp)
//!
//! Per-session voice playback engine for a chat-platform bot.
//!
//! **Purpose:** Queue audio sources per voice session, decode them through an
//! external process and pace the PCM frames into a live voice transport,
//! surviving transport hiccups and queue edits while playing.
//!
//! **Architecture:** one driver task per session engine; the
//! [`session::SessionManager`] maps session ids to engines and is the only
//! entry point for the command layer and the HTTP API.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use playback::PlaybackEngine;
pub use session::SessionManager;
