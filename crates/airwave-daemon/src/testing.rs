//! In-memory doubles shared by the unit tests.

use crate::catalog::{CatalogSource, FetchError, MetadataSource};
use crate::engine::{
    BackendEvent, ChangeReason, EngineEvent, EngineEventKind, EnginePhase, EventEmitter,
    MediaEngine, MediaItem,
};
use crate::orchestrator::{ItemSettings, Orchestrator, RecoveryDue, RecoveryPolicy};
use crate::presentation::{PresentationSurface, StationCard};
use airwave_proto::state::{PlaybackStore, StoredPlaybackState};
use airwave_proto::station::Station;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub fn station(key: &str) -> Station {
    station_with(key, "seoul", None, None)
}

/// Station titled after its key.
pub fn station_with(key: &str, city: &str, program: Option<&str>, song: Option<&str>) -> Station {
    Station {
        title: key.to_string(),
        city_group: city.to_string(),
        stream_path: key.to_string(),
        program_info_path: program.map(str::to_string),
        song_info_path: song.map(str::to_string),
        artwork_uri: None,
    }
}

pub fn item_settings() -> ItemSettings {
    ItemSettings {
        base_url: "https://radio.example".to_string(),
        default_artwork: "https://img.example/default.png".to_string(),
        default_artist: "Live radio".to_string(),
    }
}

pub fn orchestrator() -> (
    Orchestrator<FakeEngine>,
    mpsc::UnboundedReceiver<EngineEvent>,
    mpsc::UnboundedReceiver<RecoveryDue>,
) {
    let (engine, engine_rx) = FakeEngine::new();
    let (orch, recovery_rx) = Orchestrator::new(engine, item_settings(), RecoveryPolicy::default());
    (orch, engine_rx, recovery_rx)
}

/// Feed every queued engine event back into the orchestrator.
pub fn pump(orch: &mut Orchestrator<FakeEngine>, rx: &mut mpsc::UnboundedReceiver<EngineEvent>) {
    while let Ok(event) = rx.try_recv() {
        orch.handle_engine_event(event);
    }
}

// ── engine ────────────────────────────────────────────────────────────────────

/// Engine that becomes ready as soon as it is prepared.
pub struct FakeEngine {
    emitter: EventEmitter,
    items: Vec<MediaItem>,
    current: Option<usize>,
    play_when_ready: bool,
    phase: EnginePhase,
    auto_ready: bool,
    play_commands: usize,
    set_items_calls: usize,
}

impl FakeEngine {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (emitter, rx) = EventEmitter::new();
        let engine = Self {
            emitter,
            items: Vec::new(),
            current: None,
            play_when_ready: false,
            phase: EnginePhase::Idle,
            auto_ready: true,
            play_commands: 0,
            set_items_calls: 0,
        };
        (engine, rx)
    }

    /// Keep prepared items buffering instead of going ready.
    pub fn stall(&mut self) {
        self.auto_ready = false;
    }

    /// Play intent flipped off from outside the orchestrator.
    pub fn external_pause(&mut self, reason: ChangeReason) {
        self.play_when_ready = false;
        self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
            play_when_ready: false,
            reason,
        });
    }

    pub fn external_play(&mut self, reason: ChangeReason) {
        self.play_when_ready = true;
        self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
            play_when_ready: true,
            reason,
        });
    }

    /// Drop an item behind the orchestrator's back.
    pub fn remove_item(&mut self, index: usize) {
        self.items.remove(index);
        if self.current.is_some_and(|c| c >= self.items.len()) {
            self.current = self.items.len().checked_sub(1);
        }
    }

    pub fn play_commands(&self) -> usize {
        self.play_commands
    }

    pub fn set_items_calls(&self) -> usize {
        self.set_items_calls
    }
}

impl MediaEngine for FakeEngine {
    fn set_items(&mut self, items: Vec<MediaItem>, start_index: usize) {
        self.set_items_calls += 1;
        self.current = (!items.is_empty()).then(|| start_index.min(items.len() - 1));
        self.items = items;
        self.phase = EnginePhase::Idle;
        self.emitter.emit(EngineEventKind::StateChanged);
    }

    fn prepare(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.phase = if self.auto_ready {
            EnginePhase::Ready
        } else {
            EnginePhase::Buffering
        };
        self.emitter.emit(EngineEventKind::StateChanged);
    }

    fn seek_to_item(&mut self, index: usize) {
        if index < self.items.len() {
            self.current = Some(index);
            self.emitter.emit(EngineEventKind::StateChanged);
        }
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool, reason: ChangeReason) {
        if play_when_ready {
            self.play_commands += 1;
        }
        if self.play_when_ready != play_when_ready {
            self.play_when_ready = play_when_ready;
            self.emitter.emit(EngineEventKind::PlayWhenReadyChanged {
                play_when_ready,
                reason,
            });
        }
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
        }
    }

    fn ingest(&mut self, _event: &BackendEvent) {}

    fn last_event_seq(&self) -> u64 {
        self.emitter.last_seq()
    }

    fn release(&mut self) {
        self.items.clear();
        self.current = None;
        self.play_when_ready = false;
        self.phase = EnginePhase::Idle;
    }
}

// ── stores and sources ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryPlaybackStore {
    state: Mutex<StoredPlaybackState>,
    fail_writes: bool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryPlaybackStore {
    pub fn with(state: StoredPlaybackState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> StoredPlaybackState {
        self.state.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackStore for MemoryPlaybackStore {
    async fn read(&self) -> StoredPlaybackState {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.current()
    }

    async fn write(&self, state: &StoredPlaybackState) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("disk full");
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.state.lock().unwrap() = StoredPlaybackState::default();
        Ok(())
    }
}

/// Metadata source serving a scripted song sequence; the last entry repeats.
#[derive(Default)]
pub struct FakeMetadata {
    songs: Vec<String>,
    failing: bool,
    song_calls: AtomicUsize,
}

impl FakeMetadata {
    pub fn with_songs(songs: &[&str]) -> Self {
        Self {
            songs: songs.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn song_calls(&self) -> usize {
        self.song_calls.load(Ordering::SeqCst)
    }
}

fn unavailable(path: &str) -> FetchError {
    FetchError::Status {
        status: 503,
        url: path.to_string(),
    }
}

#[async_trait]
impl MetadataSource for FakeMetadata {
    async fn program_title(&self, path: &str) -> Result<String, FetchError> {
        if self.failing {
            return Err(unavailable(path));
        }
        Ok(format!("Program at {}", path))
    }

    async fn song_title(&self, path: &str) -> Result<String, FetchError> {
        let n = self.song_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(unavailable(path));
        }
        self.songs
            .get(n)
            .or(self.songs.last())
            .cloned()
            .ok_or_else(|| unavailable(path))
    }
}

/// Catalog that fails `failures` times before serving its stations.
pub struct FakeCatalog {
    stations: Mutex<Vec<Station>>,
    failures: AtomicUsize,
    forced: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(stations: Vec<Station>) -> Self {
        Self::failing_first(stations, 0)
    }

    pub fn failing_first(stations: Vec<Station>, failures: usize) -> Self {
        Self {
            stations: Mutex::new(stations),
            failures: AtomicUsize::new(failures),
            forced: AtomicUsize::new(0),
        }
    }

    pub fn replace(&self, stations: Vec<Station>) {
        *self.stations.lock().unwrap() = stations;
    }

    /// Fetches that bypassed the cache.
    pub fn forced_fetches(&self) -> usize {
        self.forced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_stations(&self, force_refresh: bool) -> Result<Vec<Station>, FetchError> {
        if force_refresh {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable("/radioStations.json"));
        }
        Ok(self.stations.lock().unwrap().clone())
    }
}

// ── presentation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationCall {
    Post(StationCard),
    Hide,
}

/// Records every call; clones share the log.
#[derive(Clone, Default)]
pub struct RecordingPresentation {
    calls: std::sync::Arc<Mutex<Vec<PresentationCall>>>,
}

impl RecordingPresentation {
    pub fn calls(&self) -> Vec<PresentationCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<PresentationCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl PresentationSurface for RecordingPresentation {
    fn post(&mut self, card: &StationCard) {
        self.calls.lock().unwrap().push(PresentationCall::Post(card.clone()));
    }

    fn hide(&mut self) {
        self.calls.lock().unwrap().push(PresentationCall::Hide);
    }
}
