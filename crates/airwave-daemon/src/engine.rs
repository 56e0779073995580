//! The media-engine seam.  The orchestrator only talks to a `MediaEngine`;
//! the production engine drives mpv, tests use an in-memory fake.

use airwave_proto::station::{Station, StationKey};
use serde_json::Value;
use tokio::sync::mpsc;

/// Why the engine's "should be playing" flag flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    UserRequest,
    Remote,
    AudioFocusLoss,
    AudioBecomingNoisy,
    OutputLost,
    EndOfItem,
}

impl ChangeReason {
    /// User and remote-controller changes are intentional; everything else is
    /// an involuntary loss of the output.
    pub fn is_intentional(self) -> bool {
        matches!(self, ChangeReason::UserRequest | ChangeReason::Remote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnginePhase {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// One entry of the engine's playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub key: StationKey,
    pub uri: String,
    pub title: String,
    pub subtitle: String,
    /// Display artist; carries the live program title when known.
    pub artist: String,
    pub artwork_uri: String,
}

impl MediaItem {
    pub fn from_station(
        station: &Station,
        base_url: &str,
        default_artwork: &str,
        default_artist: &str,
    ) -> Self {
        Self {
            key: station.key(),
            uri: station.stream_url(base_url),
            title: station.title.clone(),
            subtitle: station.city_group.clone(),
            artist: default_artist.to_string(),
            artwork_uri: station
                .artwork_uri
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| default_artwork.to_string()),
        }
    }

    pub fn with_artist(&self, artist: &str) -> Self {
        Self {
            artist: artist.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    PlayWhenReadyChanged {
        play_when_ready: bool,
        reason: ChangeReason,
    },
    /// Anything else observable changed (phase, current item, playing flag).
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    /// Strictly increasing per engine.
    pub seq: u64,
    pub kind: EngineEventKind,
}

/// Stamps and publishes engine events in emission order.
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<EngineEvent>,
    last_seq: u64,
}

impl EventEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, last_seq: 0 }, rx)
    }

    pub fn emit(&mut self, kind: EngineEventKind) -> u64 {
        self.last_seq += 1;
        let _ = self.tx.send(EngineEvent {
            seq: self.last_seq,
            kind,
        });
        self.last_seq
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

/// Unsolicited message from the engine's backend (an mpv IPC event line).
#[derive(Debug, Clone)]
pub struct BackendEvent {
    pub raw: Value,
}

impl BackendEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// An exclusive media-engine handle.  Commands return once issued; their
/// effect is observed through the engine's event stream.
pub trait MediaEngine: Send {
    fn set_items(&mut self, items: Vec<MediaItem>, start_index: usize);
    fn prepare(&mut self);
    fn seek_to_item(&mut self, index: usize);
    fn set_play_when_ready(&mut self, play_when_ready: bool, reason: ChangeReason);
    fn play_when_ready(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn phase(&self) -> EnginePhase;
    fn items(&self) -> &[MediaItem];
    fn current_index(&self) -> Option<usize>;
    /// Swap an item's metadata without touching playback.
    fn replace_item(&mut self, index: usize, item: MediaItem);
    /// Feed a raw backend event; engines without a backend ignore it.
    fn ingest(&mut self, event: &BackendEvent);
    /// Sequence number of the most recently emitted event.
    fn last_event_seq(&self) -> u64;
    fn release(&mut self);

    fn index_of(&self, key: &StationKey) -> Option<usize> {
        self.items().iter().position(|i| &i.key == key)
    }
}
