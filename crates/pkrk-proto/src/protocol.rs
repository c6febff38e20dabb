use serde::{Deserialize, Serialize};

use crate::model::PlaybackRequest;

/// Label shown when a play request carries no title.
pub const DEFAULT_TITLE: &str = "Now Playing";

/// Commands accepted by the daemon's player core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { request: PlaybackRequest },
    /// Resume after the surface refused to start playback on its own.
    Resume,
    Close,
}

/// The track a session is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    /// Encoded CDN URL handed to the playback surface.
    pub url: String,
    pub title: String,
    /// Raw storage path the URL was built from.
    pub path: String,
}

/// Why the surface could not play the current track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlaybackFailure {
    /// The resource could not be fetched, buffered or decoded.
    LoadFailed(String),
    /// Playback was held back until the user explicitly resumes.  Not a
    /// failure of the track itself.
    AutoplayBlocked,
}

impl PlaybackFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlaybackFailure::LoadFailed(_))
    }
}

impl std::fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackFailure::LoadFailed(reason) => write!(f, "load failed: {}", reason),
            PlaybackFailure::AutoplayBlocked => f.write_str("autoplay blocked, tap to play"),
        }
    }
}

/// Session lifecycle.
///
/// Transitions:
///   Idle | Closed -> Loading -> Playing -> Idle (ended)
///   Loading | Playing -> Error
///   any -> Loading (start), any -> Closed (close)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Loading {
        track: NowPlaying,
    },
    Playing {
        track: NowPlaying,
    },
    Error {
        track: NowPlaying,
        reason: PlaybackFailure,
    },
    Closed,
}

impl SessionState {
    pub fn track(&self) -> Option<&NowPlaying> {
        match self {
            SessionState::Loading { track }
            | SessionState::Playing { track }
            | SessionState::Error { track, .. } => Some(track),
            SessionState::Idle | SessionState::Closed => None,
        }
    }

    /// Closed is just a released Idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading { .. } => "loading",
            SessionState::Playing { .. } => "playing",
            SessionState::Error { .. } => "error",
            SessionState::Closed => "closed",
        }
    }
}

/// What observers of the session see.  `seq` increases on every Loading
/// transition, so two starts of the same track are distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub seq: u64,
    #[serde(flatten)]
    pub state: SessionState,
}
