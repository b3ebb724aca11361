//! Frame source abstraction
//!
//! A [`FrameSource`] is one decode pipeline for one track. The engine only
//! relies on `next_frame` / `is_resumable` / `close`, so URL streams, local
//! clips and search front-ends all look the same once opened.
//!
//! **Cancel safety:** the engine polls `next_frame` inside `tokio::select!`
//! and inside `tokio::time::timeout`. Implementations must keep partial reads
//! in `self` so a dropped call never loses bytes.

use crate::error::{Error, Result};
use crate::playback::queue::TrackRequest;
use crate::audio::types::AudioFrame;
use async_trait::async_trait;
use std::path::PathBuf;
use url::Url;

/// Lazy, finite sequence of PCM frames for one track
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `Ok(None)` at end of stream, `Err(Error::Decode)` if the
    /// decoder failed (terminal for the track)
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Whether the source survives a transport stall without losing its position
    fn is_resumable(&self) -> bool;

    /// Terminate the decoder and release its resources. Idempotent.
    async fn close(&mut self);
}

/// Opens frame sources for track requests
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Check that a reference can be resolved before it is enqueued
    fn validate(&self, source_ref: &str) -> Result<SourceKind>;

    /// Start decoding a track
    async fn open(&self, track: &TrackRequest) -> Result<Box<dyn FrameSource>>;
}

/// Search front-ends understood in source references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchProvider {
    YouTube,
    SoundCloud,
}

impl SearchProvider {
    pub fn prefix(self) -> &'static str {
        match self {
            SearchProvider::YouTube => "ytsearch:",
            SearchProvider::SoundCloud => "scsearch:",
        }
    }
}

/// Classified source reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Local clip on disk
    LocalFile(PathBuf),

    /// http(s) stream URL
    Remote(Url),

    /// `ytsearch:<query>` / `scsearch:<query>`
    Search {
        provider: SearchProvider,
        query: String,
    },
}

impl SourceKind {
    /// Classify a reference without touching the filesystem or network
    pub fn parse(source_ref: &str) -> Result<Self> {
        let trimmed = source_ref.trim();
        if trimmed.is_empty() {
            return Err(Error::SourceUnavailable("empty source reference".to_string()));
        }

        for provider in [SearchProvider::YouTube, SearchProvider::SoundCloud] {
            if let Some(query) = trimmed.strip_prefix(provider.prefix()) {
                let query = query.trim();
                if query.is_empty() {
                    return Err(Error::SourceUnavailable(format!(
                        "empty {} query",
                        provider.prefix()
                    )));
                }
                return Ok(SourceKind::Search {
                    provider,
                    query: query.to_string(),
                });
            }
        }

        if trimmed.contains("://") {
            let url = Url::parse(trimmed)
                .map_err(|e| Error::SourceUnavailable(format!("malformed URL '{}': {}", trimmed, e)))?;
            return match url.scheme() {
                "http" | "https" => {
                    if url.host_str().map_or(true, str::is_empty) {
                        Err(Error::SourceUnavailable(format!("URL has no host: {}", trimmed)))
                    } else {
                        Ok(SourceKind::Remote(url))
                    }
                }
                "file" => url
                    .to_file_path()
                    .map(SourceKind::LocalFile)
                    .map_err(|_| Error::SourceUnavailable(format!("bad file URL: {}", trimmed))),
                other => Err(Error::SourceUnavailable(format!(
                    "unsupported scheme '{}'",
                    other
                ))),
            };
        }

        Ok(SourceKind::LocalFile(PathBuf::from(trimmed)))
    }

    /// Argument handed to the decoder command
    pub fn decoder_input(&self) -> String {
        match self {
            SourceKind::LocalFile(path) => path.to_string_lossy().into_owned(),
            SourceKind::Remote(url) => url.to_string(),
            SourceKind::Search { provider, query } => format!("{}{}", provider.prefix(), query),
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, SourceKind::LocalFile(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_local() {
        let kind = SourceKind::parse("/music/clip.ogg").unwrap();
        assert_eq!(kind, SourceKind::LocalFile(PathBuf::from("/music/clip.ogg")));
        assert!(!kind.is_remote());
    }

    #[test]
    fn test_file_url_is_local() {
        let kind = SourceKind::parse("file:///music/clip.ogg").unwrap();
        assert_eq!(kind, SourceKind::LocalFile(PathBuf::from("/music/clip.ogg")));
    }

    #[test]
    fn test_http_url_is_remote() {
        let kind = SourceKind::parse("  https://cdn.example.com/a.mp3?sig=1 ").unwrap();
        match &kind {
            SourceKind::Remote(url) => assert_eq!(url.host_str(), Some("cdn.example.com")),
            other => panic!("expected remote, got {:?}", other),
        }
        assert_eq!(kind.decoder_input(), "https://cdn.example.com/a.mp3?sig=1");
        assert!(kind.is_remote());
    }

    #[test]
    fn test_search_prefixes() {
        let kind = SourceKind::parse("ytsearch: lofi beats").unwrap();
        assert_eq!(
            kind,
            SourceKind::Search {
                provider: SearchProvider::YouTube,
                query: "lofi beats".to_string()
            }
        );
        assert_eq!(kind.decoder_input(), "ytsearch:lofi beats");

        let kind = SourceKind::parse("scsearch:ambient").unwrap();
        assert!(matches!(kind, SourceKind::Search { provider: SearchProvider::SoundCloud, .. }));
    }

    #[test]
    fn test_unresolvable_references() {
        for bad in ["", "   ", "ytsearch:", "ftp://example.com/a.mp3", "http://", "not a url://x"] {
            let err = SourceKind::parse(bad).unwrap_err();
            assert_eq!(err.kind(), "source_unavailable", "input {:?}", bad);
        }
    }
}
