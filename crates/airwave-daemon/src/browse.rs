//! Read-only browsing tree over the in-memory session snapshot.
//!
//! Ids: `root`, `favorites`, `recent`, `city_<group>`, `station_<key>`.

use airwave_proto::config::Config;
use airwave_proto::protocol::{BrowseItem, DaemonState};
use airwave_proto::station::{Station, StationKey};
use std::collections::{BTreeMap, BTreeSet};

pub const ROOT_ID: &str = "root";
pub const FAVORITES_ID: &str = "favorites";
pub const RECENT_ID: &str = "recent";
const CITY_PREFIX: &str = "city_";
const STATION_PREFIX: &str = "station_";

pub fn station_media_id(key: &StationKey) -> String {
    format!("{}{}", STATION_PREFIX, key)
}

pub fn station_key_from_media_id(media_id: &str) -> Option<StationKey> {
    media_id
        .strip_prefix(STATION_PREFIX)
        .filter(|k| !k.is_empty())
        .map(StationKey::from)
}

#[derive(Debug, Clone)]
pub struct BrowseTree {
    city_labels: BTreeMap<String, String>,
    base_url: String,
    default_artwork: String,
}

impl BrowseTree {
    pub fn from_config(config: &Config) -> Self {
        Self {
            city_labels: config.browse.city_labels.clone(),
            base_url: config.catalog.base_url.clone(),
            default_artwork: config.catalog.default_artwork.clone(),
        }
    }

    pub fn city_label<'a>(&'a self, group: &'a str) -> &'a str {
        self.city_labels.get(group).map(String::as_str).unwrap_or(group)
    }

    pub fn children(&self, state: &DaemonState, parent_id: &str) -> Vec<BrowseItem> {
        match parent_id {
            ROOT_ID => self.root_children(state),
            FAVORITES_ID => self.leaves(favorite_stations(state)),
            RECENT_ID => self.leaves(recent_stations(state)),
            other => match other.strip_prefix(CITY_PREFIX) {
                Some(group) => self.leaves(city_stations(state, group)),
                None => Vec::new(),
            },
        }
    }

    pub fn item(&self, state: &DaemonState, media_id: &str) -> Option<BrowseItem> {
        match media_id {
            ROOT_ID => Some(folder(ROOT_ID.to_string(), "Radio stations")),
            FAVORITES_ID => Some(folder(FAVORITES_ID.to_string(), "Favorites")),
            RECENT_ID => Some(folder(RECENT_ID.to_string(), "Recently played")),
            other => {
                if let Some(group) = other.strip_prefix(CITY_PREFIX) {
                    state
                        .stations
                        .iter()
                        .any(|s| s.city_group == group)
                        .then(|| folder(other.to_string(), self.city_label(group)))
                } else {
                    let key = station_key_from_media_id(other)?;
                    find(state, &key).map(|s| self.leaf(s))
                }
            }
        }
    }

    /// Case-insensitive substring match on station titles, catalog order.
    pub fn search(&self, state: &DaemonState, query: &str) -> Vec<BrowseItem> {
        let needle = query.trim().to_lowercase();
        state
            .stations
            .iter()
            .filter(|s| s.title.to_lowercase().contains(&needle))
            .map(|s| self.leaf(s))
            .collect()
    }

    /// Queue to play `key` from: its favorites, recent or city category,
    /// rotated so `key` comes first.
    pub fn category_queue(&self, state: &DaemonState, key: &StationKey) -> Vec<Station> {
        let Some(selected) = find(state, key) else {
            return Vec::new();
        };
        let category: Vec<&Station> = if state.is_favorite(key) {
            favorite_stations(state)
        } else if state.recent.contains(key) {
            recent_stations(state)
        } else {
            let city = city_stations(state, &selected.city_group);
            if city.is_empty() {
                state.stations.iter().collect()
            } else {
                city
            }
        };

        let mut queue: Vec<Station> = category.into_iter().cloned().collect();
        if let Some(pos) = queue.iter().position(|s| s.has_key(key)) {
            queue.rotate_left(pos);
        }
        queue
    }

    /// Station and queue for playing a leaf id.
    pub fn resolve_play(&self, state: &DaemonState, media_id: &str) -> Option<(Station, Vec<Station>)> {
        let key = station_key_from_media_id(media_id)?;
        let station = find(state, &key)?.clone();
        let queue = self.category_queue(state, &key);
        Some((station, queue))
    }

    fn root_children(&self, state: &DaemonState) -> Vec<BrowseItem> {
        let mut items = Vec::new();
        if !state.favorites.is_empty() {
            items.push(folder(FAVORITES_ID.to_string(), "Favorites"));
        }
        if !state.recent.is_empty() {
            items.push(folder(RECENT_ID.to_string(), "Recently played"));
        }
        let groups: BTreeSet<&str> = state.stations.iter().map(|s| s.city_group.as_str()).collect();
        items.extend(
            groups
                .into_iter()
                .map(|g| folder(format!("{}{}", CITY_PREFIX, g), self.city_label(g))),
        );
        items
    }

    fn leaves(&self, stations: Vec<&Station>) -> Vec<BrowseItem> {
        stations.into_iter().map(|s| self.leaf(s)).collect()
    }

    fn leaf(&self, station: &Station) -> BrowseItem {
        BrowseItem {
            media_id: station_media_id(&station.key()),
            title: station.title.clone(),
            subtitle: Some(self.city_label(&station.city_group).to_string()),
            browsable: false,
            playable: true,
            stream_url: Some(station.stream_url(&self.base_url)),
            artwork_uri: Some(
                station
                    .artwork_uri
                    .clone()
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| self.default_artwork.clone()),
            ),
        }
    }
}

fn folder(media_id: String, title: &str) -> BrowseItem {
    BrowseItem {
        media_id,
        title: title.to_string(),
        subtitle: None,
        browsable: true,
        playable: false,
        stream_url: None,
        artwork_uri: None,
    }
}

fn find<'a>(state: &'a DaemonState, key: &StationKey) -> Option<&'a Station> {
    state.stations.iter().find(|s| s.has_key(key))
}

/// Favorites in user order, skipping keys the catalog no longer has.
fn favorite_stations(state: &DaemonState) -> Vec<&Station> {
    state.favorites.iter().filter_map(|k| find(state, k)).collect()
}

fn recent_stations(state: &DaemonState) -> Vec<&Station> {
    state.recent.iter().filter_map(|k| find(state, k)).collect()
}

fn city_stations<'a>(state: &'a DaemonState, group: &str) -> Vec<&'a Station> {
    state
        .stations
        .iter()
        .filter(|s| s.city_group == group)
        .collect()
}
