//! One-shot sleep timer.  When it elapses the session loop receives
//! `DaemonEvent::SleepTimerElapsed` and runs the stop-everything path.

use std::time::Duration;

use airwave_proto::protocol::SleepTimerInfo;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::session::DaemonEvent;

pub struct SleepTimer {
    event_tx: mpsc::Sender<DaemonEvent>,
    /// Bumped on every arm; an elapsed event from an older timer is ignored.
    generation: u64,
    pending: Option<AbortHandle>,
}

impl SleepTimer {
    pub fn new(event_tx: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            event_tx,
            generation: 0,
            pending: None,
        }
    }

    /// Start a timer for `minutes`, replacing any running one.
    pub fn arm(&mut self, minutes: u32) -> SleepTimerInfo {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let delay = Duration::from_secs(u64::from(minutes) * 60);
        info!("Sleep timer: stopping in {} min", minutes);

        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(DaemonEvent::SleepTimerElapsed { generation }).await;
        });
        self.pending = Some(handle.abort_handle());

        SleepTimerInfo {
            minutes,
            ends_at: chrono::Local::now().timestamp() + i64::from(minutes) * 60,
        }
    }

    /// Returns whether a timer was running.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                debug!("Sleep timer: cancelled");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept an elapsed event if it belongs to the running timer.
    pub fn take_elapsed(&mut self, generation: u64) -> bool {
        if self.pending.is_none() || generation != self.generation {
            return false;
        }
        self.pending = None;
        true
    }
}
