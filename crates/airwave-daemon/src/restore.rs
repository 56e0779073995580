//! Persists "what should resume on restart" and drives restore on launch.

use crate::engine::MediaEngine;
use crate::orchestrator::Orchestrator;
use airwave_proto::state::{PlaybackStore, StoredPlaybackState};
use airwave_proto::station::Station;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum PersistOp {
    Write(StoredPlaybackState),
    Clear,
    Flush(oneshot::Sender<()>),
}

pub struct RestorationCoordinator {
    store: Arc<dyn PlaybackStore>,
    writer_tx: mpsc::UnboundedSender<PersistOp>,
    restore_delay: Duration,
    last_written: Option<StoredPlaybackState>,
}

impl RestorationCoordinator {
    /// Spawns the writer task; writes are applied in the order they are made.
    pub fn new(store: Arc<dyn PlaybackStore>, restore_delay: Duration) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(store.clone(), writer_rx));
        Self {
            store,
            writer_tx,
            restore_delay,
            last_written: None,
        }
    }

    pub fn snapshot<E: MediaEngine>(orchestrator: &Orchestrator<E>) -> StoredPlaybackState {
        let state = orchestrator.state();
        StoredPlaybackState {
            queue: orchestrator.queue().stations().to_vec(),
            last_station_key: state.active_station,
            was_playing: state.is_playing,
        }
    }

    /// Persist the current state.  Unchanged snapshots are not rewritten.
    pub fn record<E: MediaEngine>(&mut self, orchestrator: &Orchestrator<E>) {
        self.save(Self::snapshot(orchestrator));
    }

    /// Persist the queue and station with playback marked as stopped.
    pub fn record_stopped<E: MediaEngine>(&mut self, orchestrator: &Orchestrator<E>) {
        let mut snapshot = Self::snapshot(orchestrator);
        snapshot.was_playing = false;
        self.save(snapshot);
    }

    fn save(&mut self, snapshot: StoredPlaybackState) {
        if self.last_written.as_ref() == Some(&snapshot) {
            return;
        }
        debug!(
            "restore: saving {} stations, last={:?}, playing={}",
            snapshot.queue.len(),
            snapshot.last_station_key,
            snapshot.was_playing
        );
        self.last_written = Some(snapshot.clone());
        let _ = self.writer_tx.send(PersistOp::Write(snapshot));
    }

    pub fn clear(&mut self) {
        self.last_written = None;
        let _ = self.writer_tx.send(PersistOp::Clear);
    }

    /// Wait until every write issued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer_tx.send(PersistOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Read the stored snapshot once and load it.  Playback only starts when
    /// `auto_play` is set, after the restore delay.  Returns the station that
    /// was started.
    pub async fn restore<E: MediaEngine>(
        &mut self,
        orchestrator: &mut Orchestrator<E>,
        auto_play: bool,
    ) -> Option<Station> {
        let stored = self.store.read().await;
        if !stored.is_empty() {
            info!(
                "restore: {} stations, last={:?}",
                stored.queue.len(),
                stored.last_station_key
            );
            orchestrator.load_queue(stored.queue.clone(), stored.last_station_key.as_ref());
            self.last_written = Some(Self::snapshot(orchestrator));
        }

        let target = stored
            .last_station()
            .cloned()
            .or_else(|| orchestrator.active_station().cloned());
        let target = match target {
            Some(t) if auto_play => t,
            _ => {
                debug!("restore: nothing to resume (auto_play={})", auto_play);
                return None;
            }
        };

        tokio::time::sleep(self.restore_delay).await;
        info!("restore: resuming {}", target.title);
        let queue = orchestrator.queue().stations().to_vec();
        orchestrator.play_specific(&target, Some(queue));
        Some(target)
    }
}

async fn writer_task(store: Arc<dyn PlaybackStore>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Write(state) => {
                if let Err(e) = store.write(&state).await {
                    warn!("restore: failed to save playback state: {}", e);
                }
            }
            PersistOp::Clear => {
                if let Err(e) = store.clear().await {
                    warn!("restore: failed to clear playback state: {}", e);
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{orchestrator, pump, station, MemoryPlaybackStore};

    fn stored(keys: &[&str], last: &str) -> StoredPlaybackState {
        StoredPlaybackState {
            queue: keys.iter().map(|k| station(k)).collect(),
            last_station_key: Some(last.into()),
            was_playing: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restore_without_auto_play_loads_but_never_plays() {
        let store = Arc::new(MemoryPlaybackStore::with(stored(&["/a", "/b", "/c"], "/b")));
        let mut coordinator = RestorationCoordinator::new(store.clone(), Duration::from_millis(500));
        let (mut orch, _rx, _recovery) = orchestrator();

        let started = coordinator.restore(&mut orch, false).await;
        assert!(started.is_none());
        assert_eq!(orch.queue().keys().len(), 3);
        assert_eq!(orch.queue().cursor(), Some(1));
        assert_eq!(orch.state().active_station, Some("/b".into()));
        assert_eq!(orch.engine().play_commands(), 0);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_with_auto_play_waits_then_plays_last_station() {
        let store = Arc::new(MemoryPlaybackStore::with(stored(&["/a", "/b", "/c"], "/c")));
        let mut coordinator = RestorationCoordinator::new(store, Duration::from_millis(500));
        let (mut orch, _rx, _recovery) = orchestrator();

        let before = tokio::time::Instant::now();
        let started = coordinator.restore(&mut orch, true).await;
        assert!(before.elapsed() >= Duration::from_millis(500));
        assert_eq!(started.map(|s| s.key()), Some("/c".into()));
        assert_eq!(orch.engine().play_commands(), 1);
        assert!(orch.engine().play_when_ready());
        // same queue: the engine playlist was reused
        assert_eq!(orch.engine().set_items_calls(), 1);
    }

    #[tokio::test]
    async fn empty_store_restores_nothing() {
        let store = Arc::new(MemoryPlaybackStore::default());
        let mut coordinator = RestorationCoordinator::new(store, Duration::from_millis(500));
        let (mut orch, _rx, _recovery) = orchestrator();
        assert!(coordinator.restore(&mut orch, true).await.is_none());
        assert!(orch.queue().is_empty());
    }

    #[tokio::test]
    async fn record_skips_duplicates_and_clear_wipes() {
        let store = Arc::new(MemoryPlaybackStore::default());
        let mut coordinator = RestorationCoordinator::new(store.clone(), Duration::ZERO);
        let (mut orch, _rx, _recovery) = orchestrator();
        orch.load_queue(vec![station("/a"), station("/b")], Some(&"/b".into()));

        coordinator.record(&orch);
        coordinator.record(&orch);
        coordinator.flush().await;
        assert_eq!(store.writes(), 1);
        let saved = store.current();
        assert_eq!(saved.last_station_key, Some("/b".into()));
        assert!(!saved.was_playing);

        coordinator.clear();
        coordinator.flush().await;
        assert!(store.current().is_empty());
    }

    #[tokio::test]
    async fn record_stopped_keeps_station_but_not_playing() {
        let store = Arc::new(MemoryPlaybackStore::default());
        let mut coordinator = RestorationCoordinator::new(store.clone(), Duration::ZERO);
        let (mut orch, mut rx, _recovery) = orchestrator();
        orch.play_specific(&station("/b"), Some(vec![station("/a"), station("/b")]));
        pump(&mut orch, &mut rx);

        coordinator.record(&orch);
        coordinator.flush().await;
        assert!(store.current().was_playing);

        coordinator.record_stopped(&orch);
        coordinator.flush().await;
        let saved = store.current();
        assert!(!saved.was_playing);
        assert_eq!(saved.last_station_key, Some("/b".into()));
        assert_eq!(saved.queue.len(), 2);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let store = Arc::new(MemoryPlaybackStore::failing_writes());
        let mut coordinator = RestorationCoordinator::new(store.clone(), Duration::ZERO);
        let (mut orch, _rx, _recovery) = orchestrator();
        orch.load_queue(vec![station("/a")], None);

        coordinator.record(&orch);
        coordinator.flush().await;
        assert!(store.current().is_empty());
    }
}
