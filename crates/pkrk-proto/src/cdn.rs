//! Storage path → CDN URL.
//!
//! Object keys come straight from ingested filenames and routinely contain
//! spaces and punctuation.  Each `/`-separated segment is percent-encoded on
//! its own so the directory separators survive.

use serde::{Deserialize, Serialize};

pub const DEFAULT_CDN_ORIGIN: &str = "https://d1jespy3mv91ys.cloudfront.net";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEncoder {
    origin: String,
}

impl PathEncoder {
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        Self { origin }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// `<origin>/<segment>/<segment>/...` with every segment percent-encoded.
    pub fn encode(&self, raw_path: &str) -> String {
        format!("{}/{}", self.origin, encode_path(raw_path))
    }
}

impl Default for PathEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CDN_ORIGIN)
    }
}

/// Percent-encodes each segment of `raw_path`, leaving `/` literal.
/// Only `A-Z a-z 0-9 - _ . ~` pass through unescaped.
pub fn encode_path(raw_path: &str) -> String {
    raw_path
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_are_preserved() {
        let raw = "film-songs/hit-kannada-songs-vol1/MonsoonRaga/Hombisilina (PenduJatt.Com.Se).mp3";
        let encoded = encode_path(raw);
        assert_eq!(encoded.split('/').count(), raw.split('/').count());
        assert!(!encoded.contains(' '));
        assert_eq!(
            encoded,
            "film-songs/hit-kannada-songs-vol1/MonsoonRaga/Hombisilina%20%28PenduJatt.Com.Se%29.mp3"
        );
    }

    #[test]
    fn test_plain_path_is_untouched() {
        let encoder = PathEncoder::default();
        assert_eq!(
            encoder.encode("stories/horror/BhootadaMane1/season1/episode1.mp3"),
            "https://d1jespy3mv91ys.cloudfront.net/stories/horror/BhootadaMane1/season1/episode1.mp3"
        );
    }

    #[test]
    fn test_empty_and_edge_inputs() {
        let encoder = PathEncoder::new("https://cdn.example.net/");
        assert_eq!(encoder.origin(), "https://cdn.example.net");
        assert_eq!(encoder.encode(""), "https://cdn.example.net/");
        assert_eq!(encoder.encode("a//b/"), "https://cdn.example.net/a//b/");
        // Already-encoded input is encoded again, not passed through.
        assert_eq!(encoder.encode("a%20b"), "https://cdn.example.net/a%2520b");
    }

    #[test]
    fn test_non_ascii_segment() {
        assert_eq!(encode_path("ಕನ್ನಡ/x y"), "%E0%B2%95%E0%B2%A8%E0%B3%8D%E0%B2%A8%E0%B2%A1/x%20y");
    }
}
