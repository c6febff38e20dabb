/// PlayerCore — single-owner event loop for the playback session.
///
/// Owns the `PlaybackSession` and the `MpvDriver` exclusively.  Client
/// commands (HTTP API) and mpv events are funneled in as `CoreEvent`s;
/// session transitions come back out as `SurfaceDirective`s which are
/// applied to mpv here and nowhere else.
///
/// mpv integration is property-observation-driven: `core-idle` flipping to
/// false while Loading means audio is flowing, `end-file` carries the
/// outcome of a track.  `core-idle` only counts once mpv has announced the
/// current playlist entry with `start-file`; earlier notifications belong to
/// the file that was replaced.  The 2-second heartbeat checks surface
/// liveness and the load timeout.
use std::time::Duration;

use pkrk_proto::cdn::PathEncoder;
use pkrk_proto::config::PlaybackConfig;
use pkrk_proto::protocol::{Command, PlaybackFailure, SessionSnapshot, SessionState};
use pkrk_proto::session::{PlaybackSession, SurfaceDirective};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE};

const HEARTBEAT: Duration = Duration::from_secs(2);

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from the HTTP API.  The snapshot after handling is sent back
    /// on `reply` when present.
    ClientCommand {
        cmd: Command,
        reply: Option<oneshot::Sender<SessionSnapshot>>,
    },
    /// Heartbeat — process liveness and load timeout.
    HeartbeatTick,
    /// Raw mpv unsolicited event (forwarded from reader task).
    MpvEvent(MpvEvent),
    /// Shutdown requested.
    Shutdown,
}

/// What an `end-file` means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EndFileSignal {
    Ended,
    Failed(String),
}

fn end_file_signal(reason: Option<&str>, file_error: Option<&str>) -> Option<EndFileSignal> {
    match reason? {
        "eof" => Some(EndFileSignal::Ended),
        "error" | "network" => Some(EndFileSignal::Failed(
            file_error.unwrap_or("playback error").to_string(),
        )),
        "quit" => Some(EndFileSignal::Failed("player quit".into())),
        // stop: replaced or released by us; redirect: mpv follows it itself.
        _ => None,
    }
}

// ── PlayerHandle ──────────────────────────────────────────────────────────────

/// Cloneable front door to the core for request handlers.
#[derive(Clone)]
pub struct PlayerHandle {
    event_tx: mpsc::Sender<CoreEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl PlayerHandle {
    pub fn new(
        event_tx: mpsc::Sender<CoreEvent>,
        snapshots: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            event_tx,
            snapshots,
        }
    }

    /// Send `cmd` and wait for the session snapshot it produced.
    pub async fn command(&self, cmd: Command) -> anyhow::Result<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.event_tx
            .send(CoreEvent::ClientCommand {
                cmd,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| anyhow::anyhow!("player core is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("player core dropped the request"))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore {
    config: PlaybackConfig,
    session: PlaybackSession,
    mpv_driver: MpvDriver,
    /// Live handle to the mpv IO tasks.  `None` when mpv is not yet connected.
    mpv_handle: Option<MpvHandle>,
    /// Channel to forward mpv events and heartbeats back into our own loop.
    event_tx: mpsc::Sender<CoreEvent>,
    /// Session seq whose track is on the surface.
    surface_seq: Option<u64>,
    /// mpv playlist entry of the most recent load.
    surface_entry: Option<i64>,
    /// mpv has started `surface_entry`; its property changes are now ours.
    entry_started: bool,
    /// Loaded paused; the user has to resume.
    hold_for_resume: bool,
    obs_core_idle: Option<bool>,
    loading_since: Option<Instant>,
}

impl PlayerCore {
    pub fn new(config: PlaybackConfig, encoder: PathEncoder, event_tx: mpsc::Sender<CoreEvent>) -> Self {
        let mpv_driver = MpvDriver::new(config.default_volume);
        Self {
            config,
            session: PlaybackSession::new(encoder),
            mpv_driver,
            mpv_handle: None,
            event_tx,
            surface_seq: None,
            surface_entry: None,
            entry_started: false,
            hold_for_resume: false,
            obs_core_idle: None,
            loading_since: None,
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle::new(self.event_tx.clone(), self.session.subscribe())
    }

    /// Run the core event loop.  Returns on `Shutdown` or when every sender
    /// is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT).await;
                if heartbeat_tx.send(CoreEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            match evt {
                CoreEvent::Shutdown => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                CoreEvent::ClientCommand { cmd, reply } => {
                    info!("PlayerCore: command {:?}", cmd);
                    self.handle_command(cmd).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(self.session.snapshot());
                    }
                }
                CoreEvent::MpvEvent(evt) => self.handle_mpv_event(evt),
                CoreEvent::HeartbeatTick => self.heartbeat(),
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn heartbeat(&mut self) {
        if self.mpv_handle.is_some() && !self.surface_alive() {
            warn!("PlayerCore: heartbeat: mpv is gone");
            self.mpv_handle = None;
            self.reset_observed_state();
            self.fail_current("playback surface exited".into());
        }
        self.check_load_timeout();
    }

    /// The IPC connection must be open, and a child we spawned must still be
    /// running.  A reattached mpv has no child, so the connection decides.
    fn surface_alive(&mut self) -> bool {
        let connected = self
            .mpv_handle
            .as_ref()
            .map_or(false, MpvHandle::is_connected);
        connected && (!self.mpv_driver.owns_process() || self.mpv_driver.process_alive())
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { request } => {
                let directive = self.session.start(request);
                self.apply(directive).await;
            }
            Command::Resume => match self.session.resume() {
                Some(directive) => self.apply(directive).await,
                None => debug!("PlayerCore: nothing to resume"),
            },
            Command::Close => {
                let directive = self.session.close();
                self.apply(directive).await;
            }
        }
    }

    async fn apply(&mut self, directive: SurfaceDirective) {
        match directive {
            SurfaceDirective::Load { seq, url } => {
                self.track_load(seq);
                let Some(handle) = self.ensure_mpv_handle().await else {
                    self.session.on_error(
                        seq,
                        PlaybackFailure::LoadFailed("playback surface unavailable".into()),
                    );
                    return;
                };
                match handle
                    .load(&url, self.mpv_driver.volume, self.hold_for_resume)
                    .await
                {
                    Ok(entry) => {
                        debug!("PlayerCore: seq {} is playlist entry {:?}", seq, entry);
                        self.surface_entry = entry;
                    }
                    Err(e) => {
                        error!("PlayerCore: loadfile failed: {}", e);
                        self.session
                            .on_error(seq, PlaybackFailure::LoadFailed(e.to_string()));
                    }
                }
            }
            SurfaceDirective::Resume { seq } => {
                self.surface_seq = Some(seq);
                self.hold_for_resume = false;
                self.loading_since = Some(Instant::now());
                let result = match self.mpv_handle.clone() {
                    Some(handle) => handle.set_pause(false).await,
                    None => Err(anyhow::anyhow!("playback surface unavailable")),
                };
                if let Err(e) = result {
                    warn!("PlayerCore: resume failed: {}", e);
                    self.session
                        .on_error(seq, PlaybackFailure::LoadFailed(e.to_string()));
                }
            }
            SurfaceDirective::Release => {
                self.surface_seq = None;
                self.surface_entry = None;
                self.entry_started = false;
                self.hold_for_resume = false;
                self.loading_since = None;
                if let Some(handle) = self.mpv_handle.as_ref() {
                    if let Err(e) = handle.stop().await {
                        warn!("PlayerCore: stop failed: {}", e);
                    }
                }
            }
        }
    }

    /// Bookkeeping for a fresh Load before anything is sent to mpv.
    fn track_load(&mut self, seq: u64) {
        self.reset_observed_state();
        self.surface_seq = Some(seq);
        self.surface_entry = None;
        self.entry_started = false;
        self.hold_for_resume = !self.config.autoplay;
        self.loading_since = Some(Instant::now());
    }

    // ── mpv events ────────────────────────────────────────────────────────────

    fn handle_mpv_event(&mut self, evt: MpvEvent) {
        debug!("mpv event: {:?}", evt.raw);

        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_CORE_IDLE if !self.entry_started => {
                    debug!("mpv: core-idle {:?} before the current entry started", data);
                }
                OBS_CORE_IDLE => {
                    let val = data.as_bool();
                    if val != self.obs_core_idle {
                        debug!("mpv: core-idle → {:?}", val);
                        self.obs_core_idle = val;
                        if val == Some(false) {
                            self.audio_flowing();
                        }
                    }
                }
                _ => {}
            }
            return;
        }

        match evt.event_name() {
            Some("start-file") => {
                if self.surface_seq.is_none() || !self.is_current_entry(evt.playlist_entry_id()) {
                    return;
                }
                debug!("mpv: start-file entry={:?}", evt.playlist_entry_id());
                self.entry_started = true;
                self.obs_core_idle = None;
            }
            Some("end-file") => {
                let entry = evt.playlist_entry_id();
                if !self.is_current_entry(entry) {
                    debug!(
                        "mpv: end-file for stale entry {:?} (current {:?})",
                        entry, self.surface_entry
                    );
                    return;
                }
                let reason = evt.end_reason();
                info!("mpv: end-file reason={:?} entry={:?}", reason, entry);
                self.obs_core_idle = Some(true);
                let Some(seq) = self.surface_seq else {
                    return;
                };
                match end_file_signal(reason, evt.file_error()) {
                    Some(EndFileSignal::Ended) => {
                        self.loading_since = None;
                        self.session.on_ended(seq);
                    }
                    Some(EndFileSignal::Failed(why)) => self.fail_current(why),
                    None => {}
                }
            }
            Some("file-loaded") => {
                if !self.hold_for_resume || !self.entry_started {
                    return;
                }
                let loading = matches!(self.session.state(), SessionState::Loading { .. });
                if let (Some(seq), true) = (self.surface_seq, loading) {
                    info!("mpv: file loaded paused, waiting for resume");
                    self.loading_since = None;
                    self.session.on_error(seq, PlaybackFailure::AutoplayBlocked);
                }
            }
            Some(name) => debug!("mpv: event {}", name),
            None => {}
        }
    }

    /// Events without an entry id, or loads whose reply carried none, are
    /// taken as current.
    fn is_current_entry(&self, entry: Option<i64>) -> bool {
        match (entry, self.surface_entry) {
            (Some(got), Some(want)) => got == want,
            _ => true,
        }
    }

    fn audio_flowing(&mut self) {
        let Some(seq) = self.surface_seq else {
            return;
        };
        if matches!(self.session.state(), SessionState::Loading { .. }) {
            self.loading_since = None;
            self.session.on_ready(seq);
        }
    }

    /// Report a surface failure for whatever is on it now.
    fn fail_current(&mut self, why: String) {
        self.loading_since = None;
        if let Some(seq) = self.surface_seq {
            self.session.on_error(seq, PlaybackFailure::LoadFailed(why));
        }
    }

    fn check_load_timeout(&mut self) {
        let Some(since) = self.loading_since else {
            return;
        };
        if !matches!(self.session.state(), SessionState::Loading { .. }) {
            self.loading_since = None;
            return;
        }
        let elapsed = since.elapsed();
        if elapsed >= Duration::from_secs(self.config.load_timeout_secs) {
            warn!("mpv: no audio after {}s", elapsed.as_secs());
            self.fail_current("timed out".into());
        }
    }

    fn reset_observed_state(&mut self) {
        self.obs_core_idle = None;
        self.loading_since = None;
    }

    // ── mpv handle management ─────────────────────────────────────────────────

    async fn ensure_mpv_handle(&mut self) -> Option<MpvHandle> {
        if self.mpv_handle.is_some() && !self.surface_alive() {
            warn!("PlayerCore: mpv is gone, dropping handle");
            self.mpv_handle = None;
        }

        if self.mpv_handle.is_none() {
            // One forwarder per connection, shared by reconnect and spawn.
            let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
            let core_tx = self.event_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = mpv_rx.recv().await {
                    if core_tx.send(CoreEvent::MpvEvent(evt)).await.is_err() {
                        break;
                    }
                }
            });

            let handle = match self.mpv_driver.try_reconnect(mpv_tx.clone()).await {
                Some(h) => h,
                None => match self.mpv_driver.spawn_and_connect(mpv_tx).await {
                    Ok(h) => h,
                    Err(e) => {
                        warn!("PlayerCore: failed to start mpv: {}", e);
                        return None;
                    }
                },
            };
            handle.observe_properties().await;
            self.mpv_handle = Some(handle);
        }

        self.mpv_handle.clone()
    }

    async fn cleanup(&mut self) {
        info!("PlayerCore: cleanup — killing mpv");
        if let Some(handle) = self.mpv_handle.take() {
            let _ = handle.stop().await;
        }
        self.mpv_driver.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpv::start_io_tasks;
    use pkrk_proto::model::PlaybackRequest;
    use serde_json::json;

    fn core(autoplay: bool) -> PlayerCore {
        let (tx, _rx) = mpsc::channel(8);
        let config = PlaybackConfig {
            autoplay,
            ..PlaybackConfig::default()
        };
        PlayerCore::new(config, PathEncoder::default(), tx)
    }

    /// Start a session and pretend mpv accepted it as `entry`.
    fn loaded(core: &mut PlayerCore, path: &str, entry: i64) -> u64 {
        let seq = match core.session.start(PlaybackRequest::new(path, None)) {
            SurfaceDirective::Load { seq, .. } => seq,
            other => panic!("expected Load, got {:?}", other),
        };
        core.track_load(seq);
        core.surface_entry = Some(entry);
        seq
    }

    fn mpv(raw: serde_json::Value) -> MpvEvent {
        MpvEvent { raw }
    }

    fn started(core: &mut PlayerCore, entry: i64) {
        core.handle_mpv_event(mpv(json!({"event": "start-file", "playlist_entry_id": entry})));
    }

    fn core_idle(core: &mut PlayerCore, idle: bool) {
        core.handle_mpv_event(mpv(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": idle})));
    }

    /// An mpv reached over IPC that this core did not spawn.  Dropping the
    /// returned peer closes the connection.
    fn reattached(core: &mut PlayerCore) -> tokio::io::DuplexStream {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(ours);
        let (tx, _rx) = mpsc::channel(8);
        core.mpv_handle = Some(start_io_tasks(read_half, write_half, tx));
        theirs
    }

    #[test]
    fn test_end_file_classification() {
        assert_eq!(end_file_signal(Some("eof"), None), Some(EndFileSignal::Ended));
        assert_eq!(
            end_file_signal(Some("error"), Some("loading failed")),
            Some(EndFileSignal::Failed("loading failed".into()))
        );
        assert_eq!(
            end_file_signal(Some("error"), None),
            Some(EndFileSignal::Failed("playback error".into()))
        );
        assert_eq!(end_file_signal(Some("stop"), None), None);
        assert_eq!(end_file_signal(Some("redirect"), None), None);
        assert_eq!(end_file_signal(None, None), None);
    }

    #[tokio::test]
    async fn test_audio_flowing_makes_session_play() {
        let mut core = core(true);
        loaded(&mut core, "stories/a.mp3", 1);
        started(&mut core, 1);

        core_idle(&mut core, true);
        assert!(matches!(core.session.state(), SessionState::Loading { .. }));

        core_idle(&mut core, false);
        assert!(matches!(core.session.state(), SessionState::Playing { .. }));
        assert!(core.loading_since.is_none());
    }

    #[tokio::test]
    async fn test_stale_end_file_is_ignored() {
        let mut core = core(true);
        loaded(&mut core, "stories/a.mp3", 1);
        loaded(&mut core, "stories/b.mp3", 2);

        core.handle_mpv_event(mpv(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 1})));
        assert!(matches!(core.session.state(), SessionState::Loading { .. }));

        core.handle_mpv_event(mpv(json!({
            "event": "end-file", "reason": "error", "playlist_entry_id": 2, "file_error": "loading failed"
        })));
        match core.session.state() {
            SessionState::Error { track, reason } => {
                assert!(track.url.ends_with("stories/b.mp3"));
                assert_eq!(reason, &PlaybackFailure::LoadFailed("loading failed".into()));
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_returns_to_idle() {
        let mut core = core(true);
        loaded(&mut core, "podcasts/season1/episode1.mp3", 5);
        started(&mut core, 5);
        core_idle(&mut core, false);
        core.handle_mpv_event(mpv(json!({"event": "end-file", "reason": "eof", "playlist_entry_id": 5})));
        assert_eq!(core.session.state(), &SessionState::Idle);
    }

    #[tokio::test]
    async fn test_paused_load_reports_autoplay_blocked() {
        let mut core = core(false);
        loaded(&mut core, "stories/a.mp3", 1);
        assert!(core.hold_for_resume);
        started(&mut core, 1);

        core.handle_mpv_event(mpv(json!({"event": "file-loaded"})));
        match core.session.state() {
            SessionState::Error { reason, .. } => assert_eq!(reason, &PlaybackFailure::AutoplayBlocked),
            other => panic!("expected Error, got {:?}", other),
        }

        // The core-idle flip after the user resumes is what makes it play.
        let resumed = core.session.resume().unwrap();
        let SurfaceDirective::Resume { seq } = resumed else {
            panic!("expected Resume");
        };
        core.surface_seq = Some(seq);
        core.hold_for_resume = false;
        core_idle(&mut core, false);
        assert!(matches!(core.session.state(), SessionState::Playing { .. }));
    }

    #[tokio::test]
    async fn test_file_loaded_with_autoplay_is_not_blocked() {
        let mut core = core(true);
        loaded(&mut core, "stories/a.mp3", 1);
        started(&mut core, 1);
        core.handle_mpv_event(mpv(json!({"event": "file-loaded"})));
        assert!(matches!(core.session.state(), SessionState::Loading { .. }));
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let mut core = core(true);
        core.config.load_timeout_secs = 0;
        loaded(&mut core, "stories/slow.mp3", 1);

        core.check_load_timeout();
        match core.session.state() {
            SessionState::Error { reason, .. } => {
                assert_eq!(reason, &PlaybackFailure::LoadFailed("timed out".into()))
            }
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(core.loading_since.is_none());
    }

    #[tokio::test]
    async fn test_events_after_release_do_nothing() {
        let mut core = core(true);
        loaded(&mut core, "stories/a.mp3", 1);
        let release = core.session.close();
        core.apply(release).await;

        core.handle_mpv_event(mpv(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 1})));
        core.handle_mpv_event(mpv(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": false})));
        assert_eq!(core.session.state(), &SessionState::Closed);
    }

    #[tokio::test]
    async fn test_replaced_track_cannot_ready_the_new_one() {
        let mut core = core(true);
        loaded(&mut core, "stories/a.mp3", 1);
        started(&mut core, 1);
        core_idle(&mut core, false);
        assert!(matches!(core.session.state(), SessionState::Playing { .. }));

        loaded(&mut core, "stories/b.mp3", 2);
        // Still queued from the track that was just replaced.
        core_idle(&mut core, false);
        started(&mut core, 1);
        core_idle(&mut core, false);
        match core.session.state() {
            SessionState::Loading { track } => assert!(track.url.ends_with("stories/b.mp3")),
            other => panic!("expected Loading, got {:?}", other),
        }

        started(&mut core, 2);
        core_idle(&mut core, true);
        assert!(matches!(core.session.state(), SessionState::Loading { .. }));
        core_idle(&mut core, false);
        assert!(matches!(core.session.state(), SessionState::Playing { .. }));
    }

    #[tokio::test]
    async fn test_reattached_surface_survives_heartbeat() {
        let mut core = core(true);
        let _peer = reattached(&mut core);
        assert!(!core.mpv_driver.owns_process());

        loaded(&mut core, "stories/a.mp3", 1);
        started(&mut core, 1);
        core_idle(&mut core, false);

        core.heartbeat();
        assert!(matches!(core.session.state(), SessionState::Playing { .. }));
        assert!(core.mpv_handle.is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_reports_dead_surface() {
        let mut core = core(true);
        let peer = reattached(&mut core);
        loaded(&mut core, "stories/a.mp3", 1);
        started(&mut core, 1);
        core_idle(&mut core, false);

        drop(peer);
        for _ in 0..50 {
            if !core.surface_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        core.heartbeat();
        match core.session.state() {
            SessionState::Error { reason, .. } => assert_eq!(
                reason,
                &PlaybackFailure::LoadFailed("playback surface exited".into())
            ),
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(core.mpv_handle.is_none());
    }
}
