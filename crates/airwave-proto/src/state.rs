use crate::protocol::{DaemonState, NowPlaying, PlaybackState, SleepTimerInfo};
use crate::station::{Station, StationKey};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Shared snapshot of the session, read by the socket and HTTP servers.
/// Only the session host writes to it.
pub struct StateManager {
    state: RwLock<DaemonState>,
}

impl StateManager {
    pub fn new(stations: Vec<Station>) -> Self {
        let state = DaemonState {
            rev: 1,
            stations,
            ..DaemonState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    pub async fn set_catalog(&self, stations: Vec<Station>) {
        let mut state = self.state.write().await;
        state.stations = stations;
        state.rev += 1;
    }

    pub async fn set_favorites(&self, favorites: Vec<StationKey>) {
        let mut state = self.state.write().await;
        if state.favorites != favorites {
            state.favorites = favorites;
            state.rev += 1;
        }
    }

    pub async fn set_recent(&self, recent: Vec<StationKey>) {
        let mut state = self.state.write().await;
        if state.recent != recent {
            state.recent = recent;
            state.rev += 1;
        }
    }

    /// Returns true when anything observable changed.
    pub async fn set_playback(&self, playback: PlaybackState, queue: Vec<StationKey>) -> bool {
        let mut state = self.state.write().await;
        if state.playback == playback && state.queue == queue {
            return false;
        }
        state.playback = playback;
        state.queue = queue;
        state.rev += 1;
        true
    }

    pub async fn set_now_playing(&self, now_playing: NowPlaying) -> bool {
        let mut state = self.state.write().await;
        if state.now_playing == now_playing {
            return false;
        }
        state.now_playing = now_playing;
        state.rev += 1;
        true
    }

    pub async fn set_sleep_timer(&self, sleep_timer: Option<SleepTimerInfo>) {
        let mut state = self.state.write().await;
        if state.sleep_timer != sleep_timer {
            state.sleep_timer = sleep_timer;
            state.rev += 1;
        }
    }

    pub async fn set_foreground(&self, foreground: bool) {
        let mut state = self.state.write().await;
        if state.foreground != foreground {
            state.foreground = foreground;
            state.rev += 1;
        }
    }
}

// ── Persisted playback snapshot ───────────────────────────────────────────────

/// What should resume on the next launch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredPlaybackState {
    #[serde(default)]
    pub queue: Vec<Station>,
    #[serde(default)]
    pub last_station_key: Option<StationKey>,
    #[serde(default)]
    pub was_playing: bool,
}

impl StoredPlaybackState {
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn last_station(&self) -> Option<&Station> {
        let key = self.last_station_key.as_ref()?;
        self.queue.iter().find(|s| s.has_key(key))
    }
}

#[async_trait]
pub trait PlaybackStore: Send + Sync {
    /// Missing or unreadable data reads as the empty default.
    async fn read(&self) -> StoredPlaybackState;
    async fn write(&self, state: &StoredPlaybackState) -> anyhow::Result<()>;
    async fn clear(&self) -> anyhow::Result<()>;
}

/// `playback.json` in the data dir.
pub struct JsonPlaybackStore {
    path: PathBuf,
}

impl JsonPlaybackStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl PlaybackStore for JsonPlaybackStore {
    async fn read(&self) -> StoredPlaybackState {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt playback state {:?}: {}", self.path, e);
                StoredPlaybackState::default()
            }),
            Err(_) => StoredPlaybackState::default(),
        }
    }

    async fn write(&self, state: &StoredPlaybackState) -> anyhow::Result<()> {
        write_json(&self.path, state).await
    }

    async fn clear(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read a JSON file, falling back to the default when it is missing or corrupt.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    if let Ok(content) = std::fs::read_to_string(path) {
        if let Ok(value) = serde_json::from_str::<T>(&content) {
            return value;
        }
    }
    T::default()
}

pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}
