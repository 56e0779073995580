//! SessionHost: single-owner event loop around the orchestrator.
//!
//! Everything that can change the session (controller commands, engine and
//! backend events, recovery timers, metadata results, store changes) arrives
//! here as a `DaemonEvent` and is handled one at a time.  After each event the
//! host republishes the shared `StateManager` snapshot, persists the restore
//! state, updates the presentation and broadcasts a `BroadcastMessage`.

use std::sync::Arc;
use std::time::Duration;

use airwave_proto::config::Config;
use airwave_proto::protocol::{Command, NowPlaying};
use airwave_proto::state::{PlaybackStore, StateManager};
use airwave_proto::station::{Station, StationKey};
use airwave_proto::stores::{FavoritesStore, RecentStore, SettingsStore};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::browse::BrowseTree;
use crate::catalog::{CatalogSource, FetchError, MetadataSource};
use crate::engine::{BackendEvent, EngineEvent, MediaEngine};
use crate::metadata::{MetadataScheduler, MetadataUpdate};
use crate::orchestrator::{ItemSettings, Orchestrator, RecoveryDue, RecoveryPolicy};
use crate::presentation::{PresentationSurface, StationCard};
use crate::restore::RestorationCoordinator;
use crate::sleep_timer::SleepTimer;
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the session loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    Engine(EngineEvent),
    /// Raw backend event (mpv IPC line), fed into the engine.
    Backend(BackendEvent),
    RecoveryDue(RecoveryDue),
    Metadata(MetadataUpdate),
    FavoritesChanged(Vec<StationKey>),
    RecentChanged(Vec<StationKey>),
    /// Result of a background catalog fetch.
    CatalogFetched(Result<Vec<Station>, FetchError>),
    SleepTimerElapsed { generation: u64 },
    Shutdown,
}

/// How a teardown treats the saved session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Explicit stop: the saved session is discarded.
    StopAll,
    /// The session ends but is offered again on the next launch.
    Detach,
}

/// A user dismissal ends the session when nothing is loaded, or when the
/// user never asked for playback to continue in the background.
fn dismissal_tears_down(by_user: bool, engine_idle: bool, allow_background_playback: bool) -> bool {
    by_user && (engine_idle || !allow_background_playback)
}

/// Everything the host is built from.
pub struct SessionDeps<E: MediaEngine> {
    pub config: Config,
    pub engine: E,
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    pub backend_events: Option<mpsc::Receiver<BackendEvent>>,
    pub catalog: Arc<dyn CatalogSource>,
    pub metadata: Arc<dyn MetadataSource>,
    pub playback_store: Arc<dyn PlaybackStore>,
    pub favorites: FavoritesStore,
    pub recent: RecentStore,
    pub settings: SettingsStore,
    pub presentation: Box<dyn PresentationSurface>,
    pub broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

// ── SessionHost ───────────────────────────────────────────────────────────────

pub struct SessionHost<E: MediaEngine> {
    config: Config,
    /// `None` once the session has been torn down.
    orchestrator: Option<Orchestrator<E>>,
    state_manager: Arc<StateManager>,
    browse: BrowseTree,
    catalog: Arc<dyn CatalogSource>,
    catalog_fetch: Option<tokio::task::AbortHandle>,
    event_tx: mpsc::Sender<DaemonEvent>,
    sleep_timer: SleepTimer,
    favorites: FavoritesStore,
    recent: RecentStore,
    settings: SettingsStore,
    restoration: RestorationCoordinator,
    metadata: MetadataScheduler,
    presentation: Box<dyn PresentationSurface>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    now_playing: NowPlaying,
    last_active: Option<StationKey>,
    last_card: Option<StationCard>,
    allow_background_playback: bool,
    foreground: bool,
    presentation_dismissed: bool,
}

impl<E: MediaEngine + 'static> SessionHost<E> {
    /// Fetch the catalog, build the orchestrator and wire every event source
    /// into `event_tx`.  The browse tree cannot answer before the catalog is
    /// known, so the fetch is awaited here.
    pub async fn start(deps: SessionDeps<E>, event_tx: mpsc::Sender<DaemonEvent>) -> Self {
        let SessionDeps {
            config,
            engine,
            engine_events,
            backend_events,
            catalog,
            metadata,
            playback_store,
            favorites,
            recent,
            settings,
            presentation,
            broadcast_tx,
        } = deps;

        let stations = match catalog.fetch_stations(false).await {
            Ok(stations) => stations,
            Err(e) => {
                warn!("Session: catalog fetch failed, starting empty: {}", e);
                Vec::new()
            }
        };
        let state_manager = Arc::new(StateManager::new(stations));
        state_manager.set_favorites(favorites.list()).await;
        state_manager.set_recent(recent.list()).await;

        let (orchestrator, recovery_rx) = Orchestrator::new(
            engine,
            ItemSettings::from_config(&config),
            RecoveryPolicy::from_config(&config.playback),
        );
        let (metadata, metadata_rx) = MetadataScheduler::new(metadata, config.metadata.clone());

        forward(engine_events, event_tx.clone(), DaemonEvent::Engine);
        forward(recovery_rx, event_tx.clone(), DaemonEvent::RecoveryDue);
        forward(metadata_rx, event_tx.clone(), DaemonEvent::Metadata);
        forward_watch(favorites.subscribe(), event_tx.clone(), DaemonEvent::FavoritesChanged);
        forward_watch(recent.subscribe(), event_tx.clone(), DaemonEvent::RecentChanged);
        if let Some(mut backend_rx) = backend_events {
            let tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = backend_rx.recv().await {
                    if tx.send(DaemonEvent::Backend(event)).await.is_err() {
                        break;
                    }
                }
            });
        }

        let mut host = Self {
            browse: BrowseTree::from_config(&config),
            restoration: RestorationCoordinator::new(playback_store, config.playback.restore_delay()),
            config,
            orchestrator: Some(orchestrator),
            state_manager,
            catalog,
            catalog_fetch: None,
            sleep_timer: SleepTimer::new(event_tx.clone()),
            event_tx,
            favorites,
            recent,
            settings,
            metadata,
            presentation,
            broadcast_tx,
            now_playing: NowPlaying::default(),
            last_active: None,
            last_card: None,
            allow_background_playback: false,
            foreground: false,
            presentation_dismissed: false,
        };
        if host.state_manager.get_state().await.stations.is_empty() {
            host.request_catalog(host.config.catalog.retry_delay());
        }
        host
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn browse_tree(&self) -> BrowseTree {
        self.browse.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.orchestrator.is_none()
    }

    #[cfg(test)]
    pub(crate) fn allows_background_playback(&self) -> bool {
        self.allow_background_playback
    }

    #[cfg(test)]
    pub(crate) fn orchestrator(&self) -> Option<&Orchestrator<E>> {
        self.orchestrator.as_ref()
    }

    #[cfg(test)]
    pub(crate) fn orchestrator_mut(&mut self) -> Option<&mut Orchestrator<E>> {
        self.orchestrator.as_mut()
    }

    /// Reload the last session.  Playback only resumes when the user enabled
    /// auto-play on start.
    pub async fn restore(&mut self) {
        let auto_play = self.settings.get().auto_play_on_start;
        let Some(orchestrator) = self.orchestrator.as_mut() else {
            return;
        };
        if self.restoration.restore(orchestrator, auto_play).await.is_some() {
            self.allow_background_playback = true;
        }
        self.sync().await;
    }

    /// Run the session loop until teardown.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("Session: starting event loop");
        while let Some(event) = event_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.teardown("event loop ended", Teardown::Detach).await;
        Ok(())
    }

    /// Handle one event.  Returns `false` once the session is over.
    pub async fn handle_event(&mut self, event: DaemonEvent) -> bool {
        if self.orchestrator.is_none() {
            debug!("Session: torn down, dropping {:?}", event);
            return false;
        }
        match event {
            DaemonEvent::ClientCommand(cmd) => {
                info!("Session: command {:?}", cmd);
                return self.handle_command(cmd).await;
            }
            DaemonEvent::Engine(event) => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    orch.handle_engine_event(event);
                }
            }
            DaemonEvent::Backend(event) => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    orch.handle_backend_event(&event);
                }
            }
            DaemonEvent::RecoveryDue(due) => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    orch.on_recovery_due(due);
                }
            }
            DaemonEvent::Metadata(update) => self.on_metadata(update).await,
            DaemonEvent::FavoritesChanged(favorites) => {
                self.state_manager.set_favorites(favorites).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            DaemonEvent::RecentChanged(recent) => {
                self.state_manager.set_recent(recent).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            DaemonEvent::CatalogFetched(result) => self.on_catalog_fetched(result).await,
            DaemonEvent::SleepTimerElapsed { generation } => {
                if self.sleep_timer.take_elapsed(generation) {
                    self.teardown("sleep timer elapsed", Teardown::StopAll).await;
                    return false;
                }
                debug!("Session: stale sleep timer {} ignored", generation);
            }
            DaemonEvent::Shutdown => {
                self.teardown("shutdown requested", Teardown::Detach).await;
                return false;
            }
        }
        self.sync().await;
        true
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Play { key, queue } => self.play_key(&key, queue).await,
            Command::PlayItem { media_id } => {
                let snapshot = self.state_manager.get_state().await;
                match self.browse.resolve_play(&snapshot, &media_id) {
                    Some((station, queue)) => self.play(&station, Some(queue)),
                    None => warn!("Session: nothing playable at {}", media_id),
                }
            }
            Command::PlayAdjacent { direction } => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    self.allow_background_playback = true;
                    orch.play_adjacent(direction);
                }
            }
            Command::TogglePlayPause => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    self.allow_background_playback = true;
                    orch.toggle_play_pause();
                }
            }
            Command::ToggleFavorite => self.toggle_favorite().await,
            Command::ReorderFavorites { keys } => match self.favorites.reorder(keys).await {
                Ok(()) => {
                    self.state_manager.set_favorites(self.favorites.list()).await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
                Err(e) => warn!("Session: failed to save favorites: {}", e),
            },
            Command::SleepTimer { minutes } => self.set_sleep_timer(minutes).await,
            Command::RefreshCatalog => self.request_catalog(Duration::ZERO),
            Command::StopAll => {
                self.teardown("stop requested", Teardown::StopAll).await;
                return false;
            }
            Command::TaskRemoved => {
                self.teardown("task removed", Teardown::Detach).await;
                return false;
            }
            Command::DismissPresentation { by_user } => {
                let idle = self.orchestrator.as_ref().is_some_and(|o| o.is_idle());
                if dismissal_tears_down(by_user, idle, self.allow_background_playback) {
                    self.teardown("presentation dismissed", Teardown::Detach).await;
                    return false;
                }
                self.dismiss_presentation().await;
            }
            Command::GetState => {
                // answered from the snapshot by the transport
            }
            Command::BrowseChildren { .. } | Command::BrowseItem { .. } | Command::Search { .. } => {
                debug!("Session: browse queries are answered by the transport");
            }
        }
        self.sync().await;
        true
    }

    async fn play_key(&mut self, key: &StationKey, queue: Option<Vec<StationKey>>) {
        let snapshot = self.state_manager.get_state().await;
        let find = |k: &StationKey| snapshot.stations.iter().find(|s| s.has_key(k)).cloned();
        let Some(station) = find(key) else {
            warn!("Session: unknown station {}", key);
            return;
        };
        let candidate = queue.map(|keys| keys.iter().filter_map(find).collect::<Vec<_>>());
        self.play(&station, candidate);
    }

    fn play(&mut self, station: &Station, candidate: Option<Vec<Station>>) {
        if let Some(orch) = self.orchestrator.as_mut() {
            self.allow_background_playback = true;
            orch.play_specific(station, candidate);
        }
    }

    async fn toggle_favorite(&mut self) {
        let Some(key) = self.last_active.clone() else {
            debug!("Session: no active station to favorite");
            return;
        };
        match self.favorites.toggle(&key).await {
            Ok(now_favorite) => {
                info!("Session: {} favorite={}", key, now_favorite);
                self.state_manager.set_favorites(self.favorites.list()).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Err(e) => warn!("Session: failed to save favorites: {}", e),
        }
    }

    async fn set_sleep_timer(&mut self, minutes: Option<u32>) {
        let info = match minutes.filter(|m| *m > 0) {
            Some(minutes) => Some(self.sleep_timer.arm(minutes)),
            None => {
                self.sleep_timer.cancel();
                None
            }
        };
        self.state_manager.set_sleep_timer(info).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn dismiss_presentation(&mut self) {
        info!("Session: presentation dismissed");
        self.presentation_dismissed = true;
        if self.last_card.take().is_some() {
            self.presentation.hide();
        }
        self.set_foreground(false).await;
    }

    // ── catalog ───────────────────────────────────────────────────────────────

    /// Fetch the catalog off the loop after `delay`, bypassing the cache.
    /// Replaces a fetch that is still waiting.
    fn request_catalog(&mut self, delay: Duration) {
        if let Some(previous) = self.catalog_fetch.take() {
            previous.abort();
        }
        debug!("Session: catalog fetch in {:?}", delay);
        let catalog = Arc::clone(&self.catalog);
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = catalog.fetch_stations(true).await;
            let _ = tx.send(DaemonEvent::CatalogFetched(result)).await;
        });
        self.catalog_fetch = Some(handle.abort_handle());
    }

    async fn on_catalog_fetched(&mut self, result: Result<Vec<Station>, FetchError>) {
        self.catalog_fetch = None;
        match result {
            Ok(stations) if !stations.is_empty() => {
                info!("Session: catalog refreshed, {} stations", stations.len());
                self.state_manager.set_catalog(stations).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Ok(_) => warn!("Session: catalog came back empty"),
            Err(e) => warn!("Session: catalog fetch failed: {}", e),
        }
        if self.state_manager.get_state().await.stations.is_empty() {
            self.request_catalog(self.config.catalog.retry_delay());
        }
    }

    // ── metadata ──────────────────────────────────────────────────────────────

    async fn on_metadata(&mut self, update: MetadataUpdate) {
        if self.last_active.as_ref() != Some(update.station()) {
            debug!("Session: dropping metadata for inactive {}", update.station());
            return;
        }
        match update {
            MetadataUpdate::Program { title, .. } => {
                if let Some(orch) = self.orchestrator.as_mut() {
                    orch.update_active_station_display_artist(Some(&title));
                }
                self.now_playing.program_title = Some(title).filter(|t| !t.trim().is_empty());
            }
            MetadataUpdate::Song { title, .. } => {
                self.now_playing.song_title = Some(title).filter(|t| !t.trim().is_empty());
            }
        }
        self.publish_now_playing().await;
    }

    async fn publish_now_playing(&mut self) {
        if self.state_manager.set_now_playing(self.now_playing.clone()).await {
            let _ = self
                .broadcast_tx
                .send(BroadcastMessage::NowPlaying(self.now_playing.clone()));
            self.refresh_presentation(true).await;
        }
    }

    // ── state propagation ─────────────────────────────────────────────────────

    async fn sync(&mut self) {
        let Some(orch) = self.orchestrator.as_ref() else {
            return;
        };
        let playback = orch.state();
        let queue = orch.queue().keys();

        if playback.active_station != self.last_active {
            self.last_active = playback.active_station.clone();
            self.on_active_station_changed().await;
        }

        let changed = self.state_manager.set_playback(playback, queue).await;
        if changed {
            if let Some(orch) = self.orchestrator.as_ref() {
                self.restoration.record(orch);
            }
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
        self.refresh_presentation(changed).await;
    }

    async fn on_active_station_changed(&mut self) {
        let station = self
            .orchestrator
            .as_ref()
            .and_then(|o| o.active_station())
            .cloned();
        if let Some(orch) = self.orchestrator.as_mut() {
            orch.update_active_station_display_artist(None);
        }
        self.now_playing = NowPlaying::default();
        self.publish_now_playing().await;
        self.metadata.on_station_changed(station.as_ref());

        if let Some(station) = station {
            info!("Session: active station is now {}", station.title);
            match self.recent.record(&station.key()).await {
                Ok(()) => self.state_manager.set_recent(self.recent.list()).await,
                Err(e) => warn!("Session: failed to save recent stations: {}", e),
            }
        }
    }

    fn current_card(&self) -> Option<StationCard> {
        let orch = self.orchestrator.as_ref()?;
        let station = orch.active_station()?;
        let state = orch.state();
        let artist = orch
            .display_artist()
            .unwrap_or(&self.config.playback.default_artist);
        let artwork = station
            .artwork_uri
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.config.catalog.default_artwork.clone());
        Some(StationCard {
            title: station.title.clone(),
            artist: artist.to_string(),
            song: self.now_playing.song_title.clone(),
            artwork_uri: Some(artwork),
            is_playing: state.is_playing,
            is_buffering: state.is_buffering,
        })
    }

    /// Post the card when it changed.  A dismissed presentation stays hidden
    /// until the next state change.
    async fn refresh_presentation(&mut self, state_changed: bool) {
        if self.presentation_dismissed {
            if !state_changed {
                return;
            }
            self.presentation_dismissed = false;
        }
        match self.current_card() {
            Some(card) => {
                if self.last_card.as_ref() != Some(&card) {
                    self.presentation.post(&card);
                    self.last_card = Some(card);
                }
            }
            None => {
                if self.last_card.take().is_some() {
                    self.presentation.hide();
                }
            }
        }
        let foreground = self.last_card.as_ref().is_some_and(StationCard::is_ongoing);
        self.set_foreground(foreground).await;
    }

    async fn set_foreground(&mut self, foreground: bool) {
        if self.foreground == foreground {
            return;
        }
        debug!("Session: foreground={}", foreground);
        self.foreground = foreground;
        self.state_manager.set_foreground(foreground).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    // ── teardown ──────────────────────────────────────────────────────────────

    /// Stop everything: leave the foreground, hide the presentation and free
    /// the engine.  Safe to call more than once.
    async fn teardown(&mut self, why: &str, kind: Teardown) {
        let Some(orchestrator) = self.orchestrator.take() else {
            return;
        };
        info!("Session: teardown ({}, {:?})", why, kind);
        self.metadata.cancel();
        if let Some(fetch) = self.catalog_fetch.take() {
            fetch.abort();
        }
        self.sleep_timer.cancel();
        self.state_manager.set_sleep_timer(None).await;
        self.set_foreground(false).await;
        if self.last_card.take().is_some() {
            self.presentation.hide();
        }
        self.allow_background_playback = false;
        match kind {
            Teardown::StopAll => self.restoration.clear(),
            Teardown::Detach => self.restoration.record_stopped(&orchestrator),
        }
        orchestrator.release();
        self.restoration.flush().await;

        let mut playback = self.state_manager.get_state().await.playback;
        playback.is_playing = false;
        playback.is_buffering = false;
        let queue = self.state_manager.get_state().await.queue;
        if self.state_manager.set_playback(playback, queue).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }
}

// ── forwarders ────────────────────────────────────────────────────────────────

fn forward<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    tx: mpsc::Sender<DaemonEvent>,
    wrap: fn(T) -> DaemonEvent,
) {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if tx.send(wrap(item)).await.is_err() {
                break;
            }
        }
    });
}

fn forward_watch(
    mut rx: watch::Receiver<Vec<StationKey>>,
    tx: mpsc::Sender<DaemonEvent>,
    wrap: fn(Vec<StationKey>) -> DaemonEvent,
) {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let value = rx.borrow_and_update().clone();
            if tx.send(wrap(value)).await.is_err() {
                break;
            }
        }
    });
}
