use serde::{Deserialize, Serialize};

use crate::station::{Station, StationKey};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame payload a peer may announce.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Prev,
    Next,
}

/// Messages sent from a controller to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Play a station, optionally with the queue it should be played from.
    Play {
        key: StationKey,
        #[serde(default)]
        queue: Option<Vec<StationKey>>,
    },
    /// Play a browse-tree leaf with its category-scoped queue.
    PlayItem { media_id: String },
    PlayAdjacent { direction: Direction },
    TogglePlayPause,
    /// Toggle the favorite flag of the active station.
    ToggleFavorite,
    /// Put favorites in this order.  Unknown keys are ignored and favorites
    /// left out keep their relative order at the end.
    ReorderFavorites { keys: Vec<StationKey> },
    /// Arm the sleep timer, or cancel it with `None` / zero minutes.
    SleepTimer {
        #[serde(default)]
        minutes: Option<u32>,
    },
    /// Re-fetch the station catalog, bypassing the cache.
    RefreshCatalog,
    /// Stop everything and tear the session down.
    StopAll,
    GetState,
    BrowseChildren { parent_id: String },
    BrowseItem { media_id: String },
    Search { query: String },
    /// The now-playing presentation was dismissed.
    DismissPresentation { by_user: bool },
    /// The owning task was swiped away / removed.
    TaskRemoved,
}

/// Messages sent from the daemon to controllers (broadcasts and replies)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    NowPlaying {
        data: NowPlaying,
    },
    Children {
        parent_id: String,
        items: Vec<BrowseItem>,
    },
    Item {
        media_id: String,
        item: Option<BrowseItem>,
    },
    SearchResults {
        query: String,
        items: Vec<BrowseItem>,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Observable playback state.  Always derived from the media engine plus the
/// queue; only the default value is built by hand.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    pub active_station: Option<StationKey>,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Live "now playing" text for the active station.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NowPlaying {
    pub program_title: Option<String>,
    pub song_title: Option<String>,
}

/// A running sleep timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepTimerInfo {
    pub minutes: u32,
    /// Unix timestamp (seconds) at which everything stops.
    pub ends_at: i64,
}

/// One node of the browsing tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseItem {
    pub media_id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub browsable: bool,
    pub playable: bool,
    /// Absolute stream URL for playable leaves.
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub artwork_uri: Option<String>,
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonState {
    #[serde(default)]
    pub rev: u64,
    /// Catalog snapshot.
    pub stations: Vec<Station>,
    /// Favorite keys in user order.
    pub favorites: Vec<StationKey>,
    /// Recently played keys, most recent first.
    pub recent: Vec<StationKey>,
    /// Keys of the loaded queue, in queue order.
    pub queue: Vec<StationKey>,
    pub playback: PlaybackState,
    pub now_playing: NowPlaying,
    /// Whether the session currently holds the foreground presentation.
    #[serde(default)]
    pub foreground: bool,
    #[serde(default)]
    pub sleep_timer: Option<SleepTimerInfo>,
}

impl DaemonState {
    pub fn active_station(&self) -> Option<&Station> {
        let key = self.playback.active_station.as_ref()?;
        self.stations.iter().find(|s| s.has_key(key))
    }

    pub fn is_favorite(&self, key: &StationKey) -> bool {
        self.favorites.contains(key)
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Payload length announced by the frame header, once it is complete.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_with_queue_decodes() {
        let msg = Message::Command(Command::Play {
            key: StationKey::from("/a.m3u8"),
            queue: Some(vec!["/a.m3u8".into(), "/b.m3u8".into()]),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { key, queue }) => {
                assert_eq!(key.as_str(), "/a.m3u8");
                assert_eq!(queue.map(|q| q.len()), Some(2));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_play_without_queue_field() {
        let raw = br#"{"cmd":"Play","key":"/a.m3u8"}"#;
        let mut framed = (raw.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(raw);
        let (decoded, _) = Message::decode(&framed).unwrap();
        assert!(matches!(
            decoded,
            Message::Command(Command::Play { queue: None, .. })
        ));
    }

    #[test]
    fn test_hello_encode_decode() {
        let state = DaemonState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                daemon_rev,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(daemon_rev, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_frame_len_reads_header() {
        let encoded = Message::Command(Command::RefreshCatalog).encode().unwrap();
        assert_eq!(Message::frame_len(&encoded), Some(encoded.len() - 4));
        assert_eq!(Message::frame_len(&encoded[..3]), None);
    }

    #[test]
    fn test_sleep_timer_minutes_default_to_cancel() {
        let raw = br#"{"cmd":"SleepTimer"}"#;
        let mut framed = (raw.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(raw);
        let (decoded, _) = Message::decode(&framed).unwrap();
        assert!(matches!(
            decoded,
            Message::Command(Command::SleepTimer { minutes: None })
        ));
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let encoded = Message::Command(Command::GetState).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..3]).is_err());
    }
}
