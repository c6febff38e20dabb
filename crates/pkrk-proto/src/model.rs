use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::cdn::PathEncoder;

/// Top-level catalog entry (e.g. "stories", "film-songs").
///
/// The optional lists are informational only.  A missing list is kept as
/// `None` so clients can tell "absent" from "empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub background_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shows: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seasons: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategories: Option<Vec<String>>,
}

impl Category {
    pub fn show_count(&self) -> Option<usize> {
        self.shows.as_ref().map(Vec::len)
    }

    pub fn season_count(&self) -> Option<usize> {
        self.seasons.as_ref().map(Vec::len)
    }

    pub fn subcategory_count(&self) -> Option<usize> {
        self.subcategories.as_ref().map(Vec::len)
    }

    /// Background artwork served from `images/backgrounds/` on the CDN.
    pub fn background_url(&self, encoder: &PathEncoder) -> String {
        encoder.encode(&format!("images/backgrounds/{}", self.background_image))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub show_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub episodes: Vec<Episode>,
    /// Owning category, when the catalog service tags its shows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

impl Show {
    pub fn episode(&self, episode_id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|e| e.episode_id == episode_id)
    }

    /// Cover thumbnail, or the category background when the show has none.
    pub fn cover_url(&self, category_id: &str, encoder: &PathEncoder) -> String {
        match self.cover_image.as_deref() {
            Some(name) if !name.is_empty() => {
                encoder.encode(&format!("images/thumbnails/{}", name))
            }
            _ => encoder.encode(&format!("images/backgrounds/{}-bg.jpg", category_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub title: String,
    /// Raw CDN object key.  Never percent-encoded at rest.
    pub audio_path: String,
    /// Display string such as "25:00"; not parsed.
    #[serde(default)]
    pub duration: String,
}

impl Episode {
    pub fn playback_request(&self) -> PlaybackRequest {
        PlaybackRequest::new(self.audio_path.clone(), Some(self.title.clone()))
    }
}

/// A single "play this" intent from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackRequest {
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl PlaybackRequest {
    pub fn new(path: impl Into<String>, title: Option<String>) -> Self {
        Self {
            path: path.into(),
            title,
        }
    }
}

/// Returns the first identifier that occurs more than once, if any.
pub(crate) fn first_duplicate<'a, I>(ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}
