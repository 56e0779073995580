//! airwave daemon: a headless background radio session.
//!
//! The `SessionHost` owns the single media engine through the
//! `Orchestrator`; controllers reach it over the TCP socket or the HTTP API.

pub mod browse;
pub mod catalog;
pub mod engine;
pub mod http;
pub mod metadata;
pub mod mpv;
pub mod orchestrator;
pub mod presentation;
pub mod restore;
pub mod session;
pub mod sleep_timer;
pub mod socket;

#[cfg(test)]
pub(crate) mod testing;

use airwave_proto::protocol::NowPlaying;

/// Fan-out notifications from the session loop to every connected client.
#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    /// The shared state snapshot changed; clients re-read it.
    StateUpdated,
    NowPlaying(NowPlaying),
    Log(String),
}
