//! The one "now playing" session.
//!
//! `PlaybackSession` is owned by a single task (the daemon's player core) and
//! mutated only through the transition methods below.  Every transition that
//! needs the playback surface to do something returns a [`SurfaceDirective`];
//! callbacks coming back from the surface carry the `seq` they were issued
//! for and are ignored once a newer session has started.
//!
//! Observers get immutable [`SessionSnapshot`]s through a watch channel.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cdn::PathEncoder;
use crate::model::PlaybackRequest;
use crate::protocol::{NowPlaying, PlaybackFailure, SessionSnapshot, SessionState, DEFAULT_TITLE};

/// Instructions for the playback surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceDirective {
    /// Drop whatever is loaded and begin loading `url`.
    Load { seq: u64, url: String },
    /// Start the already-loaded track (after autoplay was blocked).
    Resume { seq: u64 },
    /// Stop and release the surface.
    Release,
}

pub struct PlaybackSession {
    encoder: PathEncoder,
    seq: u64,
    state: SessionState,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl PlaybackSession {
    pub fn new(encoder: PathEncoder) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            encoder,
            seq: 0,
            state: SessionState::Idle,
            snapshot_tx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            seq: self.seq,
            state: self.state.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Begin a new session, preempting whatever is active.  Starting the same
    /// path twice still yields a fresh Loading transition.
    pub fn start(&mut self, request: PlaybackRequest) -> SurfaceDirective {
        // URL first: a published Loading state always carries its URL.
        let url = self.encoder.encode(&request.path);
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        if let Some(prev) = self.state.track() {
            info!(
                "session: '{}' preempted by '{}' ({})",
                prev.title,
                title,
                self.state.label()
            );
        }

        self.seq += 1;
        self.state = SessionState::Loading {
            track: NowPlaying {
                url: url.clone(),
                title,
                path: request.path,
            },
        };
        info!("session {}: loading {}", self.seq, url);
        self.publish();

        SurfaceDirective::Load { seq: self.seq, url }
    }

    /// The surface can decode and is producing audio.
    pub fn on_ready(&mut self, seq: u64) -> bool {
        if !self.is_current(seq, "ready") {
            return false;
        }
        match std::mem::take(&mut self.state) {
            SessionState::Loading { track } => {
                info!("session {}: playing '{}'", seq, track.title);
                self.state = SessionState::Playing { track };
                self.publish();
                true
            }
            other => {
                debug!("session {}: ready ignored in {}", seq, other.label());
                self.state = other;
                false
            }
        }
    }

    /// The surface could not load, decode or start the track.
    pub fn on_error(&mut self, seq: u64, reason: PlaybackFailure) -> bool {
        if !self.is_current(seq, "error") {
            return false;
        }
        match std::mem::take(&mut self.state) {
            SessionState::Loading { track } | SessionState::Playing { track } => {
                if reason.is_fatal() {
                    warn!("session {}: {} ({})", seq, reason, track.url);
                } else {
                    info!("session {}: {} ({})", seq, reason, track.url);
                }
                self.state = SessionState::Error { track, reason };
                self.publish();
                true
            }
            other => {
                debug!("session {}: error '{}' ignored in {}", seq, reason, other.label());
                self.state = other;
                false
            }
        }
    }

    /// The track played to the end; the surface is idle again.
    pub fn on_ended(&mut self, seq: u64) -> bool {
        if !self.is_current(seq, "ended") {
            return false;
        }
        if !matches!(self.state, SessionState::Playing { .. }) {
            debug!("session {}: ended ignored in {}", seq, self.state.label());
            return false;
        }
        info!("session {}: track ended", seq);
        self.state = SessionState::Idle;
        self.publish();
        true
    }

    /// User action after autoplay was blocked.  Re-enters Loading for the same
    /// track under a new `seq`.
    pub fn resume(&mut self) -> Option<SurfaceDirective> {
        match std::mem::take(&mut self.state) {
            SessionState::Error {
                track,
                reason: PlaybackFailure::AutoplayBlocked,
            } => {
                self.seq += 1;
                info!("session {}: resuming '{}'", self.seq, track.title);
                self.state = SessionState::Loading { track };
                self.publish();
                Some(SurfaceDirective::Resume { seq: self.seq })
            }
            other => {
                debug!("session: resume ignored in {}", other.label());
                self.state = other;
                None
            }
        }
    }

    /// Clear the displayed session and release the surface.  The session is
    /// immediately reusable.
    pub fn close(&mut self) -> SurfaceDirective {
        if !self.state.is_idle() {
            info!("session {}: closed ({})", self.seq, self.state.label());
        }
        self.state = SessionState::Closed;
        self.publish();
        SurfaceDirective::Release
    }

    fn is_current(&self, seq: u64, what: &str) -> bool {
        if seq != self.seq {
            debug!(
                "session: stale {} for seq {} (current {})",
                what, seq, self.seq
            );
            return false;
        }
        true
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
