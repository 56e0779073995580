//! Now-playing presentation (the "notification" of the session).

use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationCard {
    pub title: String,
    /// Program title, or the default artist text.
    pub artist: String,
    pub song: Option<String>,
    pub artwork_uri: Option<String>,
    pub is_playing: bool,
    pub is_buffering: bool,
}

impl StationCard {
    /// An ongoing card keeps the session in the foreground.
    pub fn is_ongoing(&self) -> bool {
        self.is_playing || self.is_buffering
    }
}

pub trait PresentationSurface: Send {
    fn post(&mut self, card: &StationCard);
    fn hide(&mut self);
}

/// Writes the card to the log.
#[derive(Debug, Default)]
pub struct TracingPresentation {
    last: Option<StationCard>,
}

impl PresentationSurface for TracingPresentation {
    fn post(&mut self, card: &StationCard) {
        if self.last.as_ref() == Some(card) {
            return;
        }
        let status = if card.is_playing {
            "playing"
        } else if card.is_buffering {
            "buffering"
        } else {
            "paused"
        };
        match &card.song {
            Some(song) => info!("Now {}: {} · {} · {}", status, card.title, card.artist, song),
            None => info!("Now {}: {} · {}", status, card.title, card.artist),
        }
        self.last = Some(card.clone());
    }

    fn hide(&mut self) {
        if self.last.take().is_some() {
            info!("Presentation hidden");
        }
    }
}
