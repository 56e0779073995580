//! Single owner of the media engine.  Keeps the queue, derives the published
//! `PlaybackState` and runs the recovery state machine for involuntary
//! output loss.

mod queue;
mod recovery;
#[cfg(test)]
mod tests;

pub use queue::Queue;
pub use recovery::{RecoveryDue, RecoveryPolicy};

use crate::engine::{
    BackendEvent, ChangeReason, EngineEvent, EngineEventKind, EnginePhase, MediaEngine, MediaItem,
};
use airwave_proto::config::Config;
use airwave_proto::protocol::{Direction, PlaybackState};
use airwave_proto::station::{same_keys, Station, StationKey};
use recovery::RecoveryState;
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Values used to turn stations into engine items.
#[derive(Debug, Clone)]
pub struct ItemSettings {
    pub base_url: String,
    pub default_artwork: String,
    pub default_artist: String,
}

impl ItemSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.catalog.base_url.clone(),
            default_artwork: config.catalog.default_artwork.clone(),
            default_artist: config.playback.default_artist.clone(),
        }
    }

    fn item(&self, station: &Station) -> MediaItem {
        MediaItem::from_station(
            station,
            &self.base_url,
            &self.default_artwork,
            &self.default_artist,
        )
    }
}

pub struct Orchestrator<E: MediaEngine> {
    engine: E,
    queue: Queue,
    items: ItemSettings,
    policy: RecoveryPolicy,
    recovery: RecoveryState,
    recovery_tx: mpsc::UnboundedSender<RecoveryDue>,
    /// Held while the orchestrator itself is driving the engine.
    suppress_play_when_ready: bool,
    /// Inclusive seq ranges of engine events emitted while the guard was held.
    suppressed: VecDeque<(u64, u64)>,
    state_tx: watch::Sender<PlaybackState>,
}

impl<E: MediaEngine> Orchestrator<E> {
    pub fn new(
        engine: E,
        items: ItemSettings,
        policy: RecoveryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<RecoveryDue>) {
        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlaybackState::default());
        let orchestrator = Self {
            engine,
            queue: Queue::default(),
            items,
            policy,
            recovery: RecoveryState::default(),
            recovery_tx,
            suppress_play_when_ready: false,
            suppressed: VecDeque::new(),
            state_tx,
        };
        (orchestrator, recovery_rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.state_tx.borrow().clone()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn active_station(&self) -> Option<&Station> {
        let key = self.state_tx.borrow().active_station.clone()?;
        self.queue
            .stations()
            .iter()
            .find(|s| s.has_key(&key))
    }

    /// No playlist and nothing loaded.
    pub fn is_idle(&self) -> bool {
        self.engine.phase() == EnginePhase::Idle && self.engine.items().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    // ── control surface ───────────────────────────────────────────────────────

    /// Replace the queue and leave the engine prepared but not playing.
    pub fn load_queue(&mut self, stations: Vec<Station>, active_key: Option<&StationKey>) {
        if stations.is_empty() {
            return;
        }
        let position = |key: &StationKey| stations.iter().position(|s| s.has_key(key));
        let index = active_key
            .and_then(position)
            .or_else(|| {
                let current = self.state_tx.borrow().active_station.clone()?;
                position(&current)
            })
            .unwrap_or(0);
        info!("Orchestrator: loading queue of {} at {}", stations.len(), index);

        let items: Vec<MediaItem> = stations.iter().map(|s| self.items.item(s)).collect();
        self.guarded(|this| {
            this.engine.set_play_when_ready(false, ChangeReason::UserRequest);
            this.engine.set_items(items, index);
            this.engine.prepare();
        });
        self.queue.replace(stations, Some(index));
        self.refresh_state();
    }

    /// Play `station`, rebuilding the queue around `candidate` when it is new.
    pub fn play_specific(&mut self, station: &Station, candidate: Option<Vec<Station>>) {
        let key = station.key();
        let forced = candidate.is_some();
        let base = candidate.unwrap_or_else(|| self.queue.stations().to_vec());
        let effective = if base.is_empty() {
            vec![station.clone()]
        } else if base.iter().any(|s| s.has_key(&key)) {
            base
        } else {
            let mut list = base;
            list.push(station.clone());
            list
        };

        self.recovery.reset();
        if forced && !same_keys(&effective, self.queue.stations()) {
            info!("Orchestrator: rebuilding queue around {}", key);
            self.rebuild_and_play(effective, &key);
        } else if let Some(index) = self.engine.index_of(&key) {
            debug!("Orchestrator: seeking to {} at {}", key, index);
            let cursor = effective.iter().position(|s| s.has_key(&key));
            self.queue.replace(effective, cursor);
            self.guarded(|this| this.restart_at(index));
        } else {
            warn!("Orchestrator: {} missing from engine playlist, rebuilding", key);
            self.rebuild_and_play(effective, &key);
        }
        self.refresh_state();
    }

    /// Move the cursor one step, wrapping at both ends, and play.
    pub fn play_adjacent(&mut self, direction: Direction) {
        if let Some(index) = self.engine.current_index() {
            self.queue.set_cursor(index);
        }
        let Some(index) = self.queue.step(direction) else {
            return;
        };
        debug!("Orchestrator: {:?} → {}", direction, index);
        self.recovery.reset();
        self.queue.set_cursor(index);
        self.guarded(|this| this.restart_at(index));
        self.refresh_state();
    }

    pub fn toggle_play_pause(&mut self) {
        if self.state_tx.borrow().active_station.is_none() {
            return;
        }
        let playing = self.engine.is_playing()
            || (self.engine.play_when_ready() && self.engine.phase() == EnginePhase::Buffering);
        if playing {
            info!("Orchestrator: pause");
            self.guarded(|this| {
                this.engine
                    .set_play_when_ready(false, ChangeReason::UserRequest)
            });
        } else {
            info!("Orchestrator: resume");
            self.recovery.reset();
            self.guarded(|this| this.restart_from_current());
        }
        self.refresh_state();
    }

    /// Rewrite the display artist of the active item.  Blank or missing text
    /// falls back to the default artist.
    pub fn update_active_station_display_artist(&mut self, text: Option<&str>) {
        let Some(index) = self.engine.current_index() else {
            return;
        };
        let Some(current) = self.engine.items().get(index) else {
            return;
        };
        let artist = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.items.default_artist);
        if current.artist != artist {
            let item = current.with_artist(artist);
            self.engine.replace_item(index, item);
        }
    }

    pub fn display_artist(&self) -> Option<&str> {
        let index = self.engine.current_index()?;
        self.engine.items().get(index).map(|i| i.artist.as_str())
    }

    /// Free the engine.  The orchestrator is gone afterwards.
    pub fn release(mut self) {
        info!("Orchestrator: releasing engine");
        self.recovery.cancel_pending();
        self.engine.release();
    }

    // ── engine events ─────────────────────────────────────────────────────────

    pub fn handle_backend_event(&mut self, event: &BackendEvent) {
        self.engine.ingest(event);
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        if let EngineEventKind::PlayWhenReadyChanged {
            play_when_ready,
            reason,
        } = event.kind
        {
            if self.suppress_play_when_ready || self.was_suppressed(event.seq) {
                debug!("Orchestrator: own play-intent echo seq={}", event.seq);
            } else {
                self.guarded(|this| this.classify(play_when_ready, reason));
            }
        }
        if self.recovery.attempt_in_flight() && self.engine.is_playing() {
            info!("Orchestrator: recovered, retry budget restored");
            self.recovery.reset();
        }
        self.refresh_state();
    }

    pub fn on_recovery_due(&mut self, due: RecoveryDue) {
        if !self.recovery.is_current(&due) {
            debug!("Orchestrator: stale recovery attempt {} ignored", due.attempt);
            return;
        }
        if self.engine.items().is_empty() {
            return;
        }
        info!("Orchestrator: recovery attempt {}", due.attempt);
        self.recovery.begin_attempt();
        self.guarded(|this| this.restart_from_current());
        self.refresh_state();
    }

    fn classify(&mut self, play_when_ready: bool, reason: ChangeReason) {
        if play_when_ready {
            if reason.is_intentional() {
                self.recovery.reset();
            }
            self.restart_from_current();
        } else if reason.is_intentional() {
            self.engine.set_play_when_ready(false, reason);
        } else {
            info!(
                "Orchestrator: involuntary loss {:?}, retry count {}",
                reason,
                self.recovery.retry_count()
            );
            if let Some(index) = self.engine.current_index() {
                self.engine.seek_to_item(index);
                self.engine.prepare();
            }
            self.schedule_recovery();
        }
    }

    fn schedule_recovery(&mut self) {
        let Some((attempt, delay)) = self.recovery.next_attempt(&self.policy) else {
            warn!("Orchestrator: recovery gave up after {} attempts", self.policy.max_attempts);
            return;
        };
        debug!("Orchestrator: recovery attempt {} in {:?}", attempt, delay);
        let due = RecoveryDue {
            cycle: self.recovery.cycle(),
            attempt,
        };
        let tx = self.recovery_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(due);
        });
        self.recovery.track(handle.abort_handle());
    }

    // ── engine plumbing ───────────────────────────────────────────────────────

    fn rebuild_and_play(&mut self, stations: Vec<Station>, key: &StationKey) {
        let index = stations.iter().position(|s| s.has_key(key)).unwrap_or(0);
        let items: Vec<MediaItem> = stations.iter().map(|s| self.items.item(s)).collect();
        self.guarded(|this| {
            this.engine.set_items(items, index);
            this.engine.prepare();
            this.engine
                .set_play_when_ready(true, ChangeReason::UserRequest);
        });
        self.queue.replace(stations, Some(index));
    }

    fn restart_from_current(&mut self) {
        if self.engine.items().is_empty() {
            return;
        }
        let index = self.engine.current_index().unwrap_or(0);
        self.restart_at(index);
    }

    fn restart_at(&mut self, index: usize) {
        self.engine.seek_to_item(index);
        self.engine.prepare();
        self.engine
            .set_play_when_ready(true, ChangeReason::UserRequest);
    }

    /// Run `f` with the play-intent guard held and remember which engine
    /// events it produced.
    fn guarded<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if self.suppress_play_when_ready {
            return f(self);
        }
        self.suppress_play_when_ready = true;
        let first = self.engine.last_event_seq() + 1;
        let out = f(self);
        let last = self.engine.last_event_seq();
        if last >= first {
            self.suppressed.push_back((first, last));
        }
        self.suppress_play_when_ready = false;
        out
    }

    fn was_suppressed(&mut self, seq: u64) -> bool {
        while matches!(self.suppressed.front(), Some((_, last)) if *last < seq) {
            self.suppressed.pop_front();
        }
        matches!(self.suppressed.front(), Some((first, _)) if *first <= seq)
    }

    fn refresh_state(&mut self) {
        if let Some(index) = self.engine.current_index() {
            if self.engine.items().len() == self.queue.len() {
                self.queue.set_cursor(index);
            }
        }
        let active_station = self
            .engine
            .current_index()
            .and_then(|i| self.engine.items().get(i))
            .map(|item| item.key.clone())
            .or_else(|| self.queue.current().map(Station::key));
        let browsable = !self.queue.is_empty();
        let next = PlaybackState {
            active_station,
            is_playing: self.engine.is_playing(),
            is_buffering: self.engine.phase() == EnginePhase::Buffering,
            has_prev: browsable,
            has_next: browsable,
        };
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}
