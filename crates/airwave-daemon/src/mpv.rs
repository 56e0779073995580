/// mpv-backed media engine.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → BackendEvent channel
/// ```
///
/// `MpvEngine` keeps the playlist, cursor and play intent locally and loads
/// one stream at a time into mpv.  Intent changes are emitted as engine events
/// the moment they are requested; mpv's own pushes only matter when they
/// disagree with what was requested.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use crate::engine::{
    BackendEvent, ChangeReason, EngineEvent, EngineEventKind, EnginePhase, EventEmitter,
    MediaEngine, MediaItem,
};
use airwave_proto::config::MpvConfig;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

// ── single-instance guard ─────────────────────────────────────────────────────

static ENGINE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Held by the one live `MpvEngine` of the process.
pub struct EngineClaim(());

impl EngineClaim {
    pub fn acquire() -> anyhow::Result<Self> {
        ENGINE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| anyhow::anyhow!("a media engine is already live in this process"))?;
        Ok(Self(()))
    }
}

impl Drop for EngineClaim {
    fn drop(&mut self) {
        ENGINE_CLAIMED.store(false, Ordering::Release);
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    fn request(command: Value) -> anyhow::Result<(PendingRequest, oneshot::Receiver<anyhow::Result<Value>>)> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');
        let (reply_tx, reply_rx) = oneshot::channel();
        Ok((
            PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            },
            reply_rx,
        ))
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let (req, reply_rx) = Self::request(command)?;
        let req_id = req.req_id;
        self.tx
            .send(req)
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Queue a command without waiting for the reply.  Commands keep their
    /// submission order.
    pub fn fire(&self, command: Value) {
        let (req, _reply_rx) = match Self::request(command) {
            Ok(r) => r,
            Err(e) => {
                warn!("mpv: failed to encode command: {}", e);
                return;
            }
        };
        if let Err(e) = self.tx.try_send(req) {
            warn!("mpv: dropping command, writer unavailable: {}", e);
        }
    }

    pub async fn observe_properties(&self) {
        let props = [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(volume: f32) -> Self {
        Self {
            socket_name: airwave_proto::platform::mpv_socket_name(),
            process: None,
            volume,
        }
    }

    /// Ask the process to die without waiting for it.
    pub fn start_kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.start_kill();
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        self.start_kill();

        info!("mpv: spawning new process");
        let mpv_binary = airwave_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let ipc_arg = airwave_proto::platform::mpv_socket_arg();

        // Start paused so the initial `pause` push matches "not playing".
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--pause")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(vol_arg)
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
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<BackendEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    reader: BufReader<R>,
    writer: W,
    event_tx: mpsc::Sender<BackendEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<BackendEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(BackendEvent { raw: val }).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
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

// ── engine ────────────────────────────────────────────────────────────────────

pub struct MpvEngine {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    emitter: EventEmitter,
    items: Vec<MediaItem>,
    current: Option<usize>,
    /// Index of the item whose stream is loaded in mpv.
    loaded: Option<usize>,
    play_when_ready: bool,
    phase: EnginePhase,
    /// Pause values we asked mpv for and whose push has not arrived yet.
    pending_pause: VecDeque<bool>,
    _claim: Option<EngineClaim>,
}

impl MpvEngine {
    /// Spawn mpv and connect to it.  Fails if another engine is live.
    pub async fn launch(
        config: &MpvConfig,
    ) -> anyhow::Result<(
        Self,
        mpsc::UnboundedReceiver<EngineEvent>,
        mpsc::Receiver<BackendEvent>,
    )> {
        let claim = EngineClaim::acquire()?;
        let mut driver = MpvDriver::new(config.default_volume);
        let (backend_tx, backend_rx) = mpsc::channel::<BackendEvent>(64);
        let handle = driver.spawn_and_connect(backend_tx).await?;
        handle.observe_properties().await;

        let (emitter, engine_rx) = EventEmitter::new();
        let engine = Self {
            driver,
            handle: Some(handle),
            emitter,
            items: Vec::new(),
            current: None,
            loaded: None,
            play_when_ready: false,
            phase: EnginePhase::Idle,
            pending_pause: VecDeque::new(),
            _claim: Some(claim),
        };
        Ok((engine, engine_rx, backend_rx))
    }

    fn fire(&self, command: Value) {
        if let Some(h) = &self.handle {
            h.fire(command);
        }
    }

    fn push_pause(&mut self, paused: bool) {
        self.pending_pause.push_back(paused);
        self.fire(json!(["set_property", "pause", paused]));
    }

    fn load_current(&mut self) {
        let Some(idx) = self.current else { return };
        let Some(item) = self.items.get(idx) else { return };
        info!("mpv: loading {} ({})", item.title, item.uri);
        self.fire(json!(["loadfile", item.uri.clone(), "replace"]));
        self.loaded = Some(idx);
        self.phase = EnginePhase::Buffering;
    }

    fn set_phase(&mut self, phase: EnginePhase) {
        if self.phase != phase {
            debug!("mpv: phase {:?} → {:?}", self.phase, phase);
            self.phase = phase;
            self.emitter.emit(EngineEventKind::StateChanged);
        }
    }

    fn on_pause_push(&mut self, paused: bool) {
        if let Some(pos) = self.pending_pause.iter().position(|p| *p == paused) {
            self.pending_pause.drain(..=pos);
            return;
        }
        if paused == !self.play_when_ready {
            return;
        }
        info!("mpv: pause flipped externally → {}", paused);
        self.play_when_ready = !paused;
        self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
            play_when_ready: !paused,
            reason: ChangeReason::Remote,
        });
    }

    fn on_end_file(&mut self, reason: &str) {
        info!("mpv: end-file reason={}", reason);
        match reason {
            "error" | "network" => {
                self.loaded = None;
                self.set_phase(EnginePhase::Idle);
                if self.play_when_ready {
                    warn!("mpv: stream lost while playing");
                    self.play_when_ready = false;
                    self.push_pause(true);
                    self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
                        play_when_ready: false,
                        reason: ChangeReason::OutputLost,
                    });
                }
            }
            "eof" => {
                self.loaded = None;
                self.set_phase(EnginePhase::Ended);
            }
            _ => {}
        }
    }
}

impl MediaEngine for MpvEngine {
    fn set_items(&mut self, items: Vec<MediaItem>, start_index: usize) {
        self.current = if items.is_empty() {
            None
        } else {
            Some(start_index.min(items.len() - 1))
        };
        self.items = items;
        self.loaded = None;
        self.fire(json!(["stop"]));
        self.phase = EnginePhase::Idle;
        self.emitter.emit(EngineEventKind::StateChanged);
    }

    /// Loads the current item unless it is already loaded.
    fn prepare(&mut self) {
        if self.loaded.is_some() && self.loaded == self.current {
            return;
        }
        self.load_current();
        self.emitter.emit(EngineEventKind::StateChanged);
    }

    fn seek_to_item(&mut self, index: usize) {
        if index >= self.items.len() {
            return;
        }
        let changed = self.current != Some(index);
        self.current = Some(index);
        if self.loaded.is_some() && (changed || self.loaded != Some(index)) {
            self.load_current();
        }
        self.emitter.emit(EngineEventKind::StateChanged);
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool, reason: ChangeReason) {
        if self.play_when_ready == play_when_ready {
            return;
        }
        self.play_when_ready = play_when_ready;
        self.push_pause(!play_when_ready);
        self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
            play_when_ready,
            reason,
        });
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn is_playing(&self) -> bool {
        self.play_when_ready && self.phase == EnginePhase::Ready
    }

    fn phase(&self) -> EnginePhase {
        self.phase
    }

    fn items(&self) -> &[MediaItem] {
        &self.items
    }

    fn current_index(&self) -> Option<usize> {
        self.current
    }

    fn replace_item(&mut self, index: usize, item: MediaItem) {
        if let Some(slot) = self.items.get_mut(index) {
            *slot = item;
            self.emitter.emit(EngineEventKind::StateChanged);
        }
    }

    fn ingest(&mut self, event: &BackendEvent) {
        if let Some((obs_id, data)) = event.as_property_change() {
            match obs_id {
                OBS_PAUSE => {
                    if let Some(paused) = data.as_bool() {
                        self.on_pause_push(paused);
                    }
                }
                OBS_CORE_IDLE => {
                    if self.loaded.is_none() {
                        return;
                    }
                    match data.as_bool() {
                        Some(false) => self.set_phase(EnginePhase::Ready),
                        Some(true) if self.play_when_ready => {
                            self.set_phase(EnginePhase::Buffering)
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            return;
        }

        match event.event_name() {
            Some("end-file") => {
                let reason = event
                    .raw
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                self.on_end_file(&reason);
            }
            Some("start-file") => self.set_phase(EnginePhase::Buffering),
            Some("file-loaded") if !self.play_when_ready => self.set_phase(EnginePhase::Ready),
            _ => {}
        }
    }

    fn last_event_seq(&self) -> u64 {
        self.emitter.last_seq()
    }

    fn release(&mut self) {
        if let Some(h) = self.handle.take() {
            h.fire(json!(["quit"]));
        }
        self.driver.start_kill();
        self.items.clear();
        self.current = None;
        self.loaded = None;
        self.play_when_ready = false;
        self.phase = EnginePhase::Idle;
        self._claim = None;
        info!("mpv: engine released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (MpvEngine, mpsc::UnboundedReceiver<EngineEvent>) {
        let (emitter, rx) = EventEmitter::new();
        let engine = MpvEngine {
            driver: MpvDriver::new(0.5),
            handle: None,
            emitter,
            items: vec![MediaItem {
                key: "/a".into(),
                uri: "https://r/a".into(),
                title: "A".into(),
                subtitle: "seoul".into(),
                artist: "Live radio".into(),
                artwork_uri: String::new(),
            }],
            current: Some(0),
            loaded: Some(0),
            play_when_ready: false,
            phase: EnginePhase::Ready,
            pending_pause: VecDeque::new(),
            _claim: None,
        };
        (engine, rx)
    }

    fn pause_push(paused: bool) -> BackendEvent {
        BackendEvent {
            raw: json!({"event": "property-change", "id": OBS_PAUSE, "name": "pause", "data": paused}),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEventKind> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e.kind);
        }
        out
    }

    #[test]
    fn own_pause_echo_is_not_a_remote_flip() {
        let (mut engine, mut rx) = engine();
        engine.set_play_when_ready(true, ChangeReason::UserRequest);
        engine.ingest(&pause_push(false));
        assert_eq!(
            drain(&mut rx),
            vec![EngineEventKind::PlayWhenReadyChanged {
                play_when_ready: true,
                reason: ChangeReason::UserRequest
            }]
        );
    }

    #[test]
    fn unrequested_pause_is_remote() {
        let (mut engine, mut rx) = engine();
        engine.set_play_when_ready(true, ChangeReason::UserRequest);
        engine.ingest(&pause_push(false));
        drain(&mut rx);

        engine.ingest(&pause_push(true));
        assert!(!engine.play_when_ready());
        assert_eq!(
            drain(&mut rx),
            vec![EngineEventKind::PlayWhenReadyChanged {
                play_when_ready: false,
                reason: ChangeReason::Remote
            }]
        );
    }

    #[test]
    fn network_end_file_while_playing_is_output_lost() {
        let (mut engine, mut rx) = engine();
        engine.set_play_when_ready(true, ChangeReason::UserRequest);
        drain(&mut rx);

        engine.ingest(&BackendEvent {
            raw: json!({"event": "end-file", "reason": "network"}),
        });
        assert_eq!(engine.phase(), EnginePhase::Idle);
        assert!(drain(&mut rx).contains(&EngineEventKind::PlayWhenReadyChanged {
            play_when_ready: false,
            reason: ChangeReason::OutputLost
        }));
    }

    #[test]
    fn second_claim_fails_until_first_dropped() {
        let first = EngineClaim::acquire().unwrap();
        assert!(EngineClaim::acquire().is_err());
        drop(first);
        let again = EngineClaim::acquire();
        assert!(again.is_ok());
    }
}
