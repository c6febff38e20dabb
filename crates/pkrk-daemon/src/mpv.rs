/// mpv IPC driver — the daemon's playback surface.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← MpvRequest via mpsc, serialised → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (has request_id) → matching oneshot
///                                └── event / property-change → event channel
/// ```
///
/// `MpvHandle` is cheaply cloneable; `MpvDriver` owns the child process.
/// Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id, matched in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited mpv message (event or property change).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// `Some((obs_id, data))` for property-change events.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }

    /// "end-file", "start-file", "file-loaded", ...
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.raw.get("playlist_entry_id")?.as_i64()
    }

    /// end-file reason: eof, stop, quit, error, redirect.
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }

    pub fn file_error(&self) -> Option<&str> {
        self.raw.get("file_error")?.as_str()
    }
}

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
    /// Cleared by the reader task when the IPC connection closes.
    connected: Arc<AtomicBool>,
}

impl MpvHandle {
    /// Whether the IPC connection is still open.  Works for reattached mpv
    /// instances too, where there is no child process to poll.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        payload.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Replace whatever is playing with `url`.  Returns mpv's playlist entry
    /// id for the new file when the mpv version reports one.
    pub async fn load(&self, url: &str, volume: f32, paused: bool) -> anyhow::Result<Option<i64>> {
        self.set_pause(paused).await?;
        let reply = self.send(json!(["loadfile", url, "replace"])).await?;
        if let Err(e) = self.set_volume(volume).await {
            warn!("mpv: set volume failed: {}", e);
        }
        Ok(reply["data"]["playlist_entry_id"].as_i64())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Must be re-issued on every fresh connection.
    pub async fn observe_properties(&self) {
        match self
            .send(json!(["observe_property", OBS_CORE_IDLE, "core-idle"]))
            .await
        {
            Ok(_) => debug!("mpv: observe_property id={} name=core-idle", OBS_CORE_IDLE),
            Err(e) => warn!("mpv: observe_property core-idle failed: {}", e),
        }
    }
}

pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    pub volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: pkrk_proto::platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    /// True when this driver spawned the running mpv, false after a
    /// reattach.
    pub fn owns_process(&self) -> bool {
        self.process.is_some()
    }

    /// Forget a child that has already exited so a reattached mpv is not
    /// judged by it.
    fn reap_exited(&mut self) {
        if self.process.is_some() && !self.process_alive() {
            self.process = None;
        }
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self) -> anyhow::Result<()> {
        self.kill().await;

        let mpv_binary = pkrk_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", mpv_binary.display());

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(pkrk_proto::platform::mpv_socket_arg())
            .arg(format!(
                "--volume={}",
                (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process().await?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    /// Attach to an mpv left running by a previous daemon.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        self.reap_exited();
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                let (read_half, write_half) = stream.into_split();
                Some(start_io_tasks(read_half, write_half, event_tx))
            }
            Err(e) => {
                debug!("mpv: no live socket to reconnect to: {}", e);
                None
            }
        }
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process().await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        self.reap_exited();
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                Some(start_io_tasks(read_half, write_half, event_tx))
            }
            Err(e) => {
                debug!("mpv: no live pipe to reconnect to: {}", e);
                None
            }
        }
    }
}

pub(crate) fn start_io_tasks<R, W>(
    read_half: R,
    write_half: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);

    let connected = Arc::new(AtomicBool::new(true));

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(
        BufReader::new(read_half),
        pending,
        event_tx,
        connected.clone(),
    ));

    MpvHandle {
        tx: cmd_tx,
        connected,
    }
}

async fn fail_all(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", why)));
    }
}

/// Routes a parsed line: replies to their waiting request, everything else
/// to the event channel.
async fn dispatch_line(val: Value, pending: &PendingMap, event_tx: &mpsc::Sender<MpvEvent>) {
    let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
        let _ = event_tx.send(MpvEvent { raw: val }).await;
        return;
    };

    let Some(tx) = pending.lock().await.remove(&req_id) else {
        debug!("mpv reader: reply for unknown req={}", req_id);
        return;
    };
    let result = match val["error"].as_str() {
        Some("success") => Ok(val),
        other => Err(anyhow::anyhow!(
            "mpv error: {}",
            other.unwrap_or("unknown error")
        )),
    };
    let _ = tx.send(result);
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
    connected: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(val) => dispatch_line(val, &pending, &event_tx).await,
                    Err(e) => debug!("mpv reader: invalid json '{}': {}", trimmed, e),
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
    connected.store(false, Ordering::Release);
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_property_change_parsing() {
        let evt = event(json!({"event": "property-change", "id": 1, "name": "core-idle", "data": false}));
        let (id, data) = evt.as_property_change().unwrap();
        assert_eq!(id, OBS_CORE_IDLE);
        assert_eq!(data.as_bool(), Some(false));

        let end = event(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 4, "file_error": "loading failed"}));
        assert!(end.as_property_change().is_none());
        assert_eq!(end.event_name(), Some("end-file"));
        assert_eq!(end.end_reason(), Some("error"));
        assert_eq!(end.playlist_entry_id(), Some(4));
        assert_eq!(end.file_error(), Some("loading failed"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_replies_and_events() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (ok_tx, ok_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();
        pending.lock().await.insert(7, ok_tx);
        pending.lock().await.insert(8, err_tx);
        let (event_tx, mut event_rx) = mpsc::channel(4);

        dispatch_line(json!({"request_id": 7, "error": "success", "data": {"playlist_entry_id": 2}}), &pending, &event_tx).await;
        dispatch_line(json!({"request_id": 8, "error": "property unavailable"}), &pending, &event_tx).await;
        dispatch_line(json!({"event": "file-loaded"}), &pending, &event_tx).await;

        let reply = ok_rx.await.unwrap().unwrap();
        assert_eq!(reply["data"]["playlist_entry_id"], 2);
        assert!(err_rx.await.unwrap().is_err());
        assert_eq!(event_rx.recv().await.unwrap().event_name(), Some("file-loaded"));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_flag_follows_peer() {
        let (ours, theirs) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(ours);
        let (event_tx, _event_rx) = mpsc::channel(4);
        let handle = start_io_tasks(read_half, write_half, event_tx);
        assert!(handle.is_connected());

        drop(theirs);
        for _ in 0..50 {
            if !handle.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handle.is_connected());
        assert!(handle.send(json!(["get_property", "pause"])).await.is_err());
    }
}
