//! Per-station polling of the program and song endpoints.
//!
//! Program titles refresh on the wall-clock grid (every 5 minutes by default),
//! songs every 30 seconds with a quiet window after each observed change.
//! Results go back to the session host as `MetadataUpdate`s.

use crate::catalog::MetadataSource;
use airwave_proto::config::MetadataConfig;
use airwave_proto::station::{Station, StationKey};
use chrono::Timelike;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    Program { station: StationKey, title: String },
    Song { station: StationKey, title: String },
}

impl MetadataUpdate {
    pub fn station(&self) -> &StationKey {
        match self {
            MetadataUpdate::Program { station, .. } | MetadataUpdate::Song { station, .. } => {
                station
            }
        }
    }
}

/// Time until the next wall-clock multiple of `grid_minutes`.
pub fn program_refresh_delay(minute: u32, second: u32, grid_minutes: u32) -> Duration {
    let grid = grid_minutes.max(1);
    let minutes_left = grid - minute % grid;
    let secs = (minutes_left * 60).saturating_sub(second).max(1);
    Duration::from_secs(u64::from(secs))
}

/// Suppresses song fetches for a while after the value changed.
#[derive(Debug)]
pub struct SongDebounce {
    window: Duration,
    last_value: Option<String>,
    changed_at: Option<Instant>,
}

impl SongDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_value: None,
            changed_at: None,
        }
    }

    pub fn should_skip(&self, now: Instant) -> bool {
        self.changed_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.window)
    }

    /// Record a fetched value.  A change from a previously seen value starts
    /// the quiet window.
    pub fn observe(&mut self, value: &str, now: Instant) {
        if self.last_value.as_deref().is_some_and(|last| last != value) {
            self.changed_at = Some(now);
        }
        self.last_value = Some(value.to_string());
    }
}

pub struct MetadataScheduler {
    source: Arc<dyn MetadataSource>,
    config: MetadataConfig,
    updates_tx: mpsc::UnboundedSender<MetadataUpdate>,
    tasks: Vec<AbortHandle>,
    active: Option<StationKey>,
}

impl MetadataScheduler {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        config: MetadataConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MetadataUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            source,
            config,
            updates_tx,
            tasks: Vec::new(),
            active: None,
        };
        (scheduler, updates_rx)
    }

    pub fn active(&self) -> Option<&StationKey> {
        self.active.as_ref()
    }

    /// Cancel all polling and start fresh for `station`.
    pub fn on_station_changed(&mut self, station: Option<&Station>) {
        self.cancel();
        self.active = station.map(Station::key);
        let Some(station) = station else { return };

        if let Some(path) = station.program_path() {
            debug!("metadata: program polling for {}", station.title);
            let handle = tokio::spawn(program_loop(
                self.source.clone(),
                station.key(),
                path.to_string(),
                self.config.program_grid_minutes,
                self.updates_tx.clone(),
            ));
            self.tasks.push(handle.abort_handle());
        }
        if let Some(path) = station.song_path() {
            debug!("metadata: song polling for {}", station.title);
            let handle = tokio::spawn(song_loop(
                self.source.clone(),
                station.key(),
                path.to_string(),
                Duration::from_secs(self.config.song_poll_secs),
                Duration::from_secs(self.config.song_debounce_secs),
                self.updates_tx.clone(),
            ));
            self.tasks.push(handle.abort_handle());
        }
    }

    pub fn cancel(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.active = None;
    }
}

impl Drop for MetadataScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn program_loop(
    source: Arc<dyn MetadataSource>,
    station: StationKey,
    path: String,
    grid_minutes: u32,
    tx: mpsc::UnboundedSender<MetadataUpdate>,
) {
    loop {
        match source.program_title(&path).await {
            Ok(title) => {
                let update = MetadataUpdate::Program {
                    station: station.clone(),
                    title,
                };
                if tx.send(update).is_err() {
                    return;
                }
            }
            Err(e) => warn!("metadata: program fetch for {} failed: {}", station, e),
        }

        let now = chrono::Local::now();
        let delay = program_refresh_delay(now.minute(), now.second(), grid_minutes);
        debug!("metadata: next program refresh for {} in {:?}", station, delay);
        tokio::time::sleep(delay).await;
    }
}

async fn song_loop(
    source: Arc<dyn MetadataSource>,
    station: StationKey,
    path: String,
    interval: Duration,
    debounce_window: Duration,
    tx: mpsc::UnboundedSender<MetadataUpdate>,
) {
    let mut debounce = SongDebounce::new(debounce_window);
    let mut first = true;
    loop {
        if !first {
            tokio::time::sleep(interval).await;
            if debounce.should_skip(Instant::now()) {
                debug!("metadata: song for {} changed recently, skipping", station);
                continue;
            }
        }
        first = false;

        match source.song_title(&path).await {
            Ok(title) => {
                debounce.observe(&title, Instant::now());
                let update = MetadataUpdate::Song {
                    station: station.clone(),
                    title,
                };
                if tx.send(update).is_err() {
                    return;
                }
            }
            Err(e) => warn!("metadata: song fetch for {} failed: {}", station, e),
        }
    }
}
