//! Small JSON-backed stores for favorites, recently played stations and user
//! settings.  Each store keeps its value in a `watch` channel so the daemon
//! can observe changes without touching the disk again.  Files are read once
//! on open; writes go through `tokio::fs`.

use crate::state::{load_json_or_default, write_json};
use crate::station::StationKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Ordered favorite keys.  Order is user-defined.
pub struct FavoritesStore {
    path: PathBuf,
    tx: watch::Sender<Vec<StationKey>>,
}

impl FavoritesStore {
    pub fn open(path: PathBuf) -> Self {
        let favorites: Vec<StationKey> = load_json_or_default(&path);
        let (tx, _) = watch::channel(dedup(favorites));
        Self { path, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<StationKey>> {
        self.tx.subscribe()
    }

    pub fn list(&self) -> Vec<StationKey> {
        self.tx.borrow().clone()
    }

    pub fn contains(&self, key: &StationKey) -> bool {
        self.tx.borrow().contains(key)
    }

    /// Returns whether `key` is a favorite afterwards.
    pub async fn toggle(&self, key: &StationKey) -> anyhow::Result<bool> {
        let mut favorites = self.list();
        let now_favorite = match favorites.iter().position(|k| k == key) {
            Some(pos) => {
                favorites.remove(pos);
                false
            }
            None => {
                favorites.push(key.clone());
                true
            }
        };
        self.commit(favorites).await?;
        Ok(now_favorite)
    }

    /// Append keys that are not favorites yet, keeping their given order.
    pub async fn add_many(&self, keys: &[StationKey]) -> anyhow::Result<()> {
        let mut favorites = self.list();
        for key in keys {
            if !favorites.contains(key) {
                favorites.push(key.clone());
            }
        }
        self.commit(favorites).await
    }

    /// Keys that are not favorites are dropped; favorites missing from
    /// `new_order` follow in their previous order.
    pub async fn reorder(&self, new_order: Vec<StationKey>) -> anyhow::Result<()> {
        let current = self.list();
        let mut favorites: Vec<StationKey> = dedup(new_order)
            .into_iter()
            .filter(|k| current.contains(k))
            .collect();
        for key in current {
            if !favorites.contains(&key) {
                favorites.push(key);
            }
        }
        self.commit(favorites).await
    }

    async fn commit(&self, favorites: Vec<StationKey>) -> anyhow::Result<()> {
        write_json(&self.path, &favorites).await?;
        self.tx.send_replace(favorites);
        Ok(())
    }
}

/// Most-recent-first list of played stations.
pub struct RecentStore {
    path: PathBuf,
    limit: usize,
    tx: watch::Sender<Vec<StationKey>>,
}

impl RecentStore {
    pub fn open(path: PathBuf, limit: usize) -> Self {
        let mut recent = dedup(load_json_or_default::<Vec<StationKey>>(&path));
        recent.truncate(limit);
        let (tx, _) = watch::channel(recent);
        Self { path, limit, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<StationKey>> {
        self.tx.subscribe()
    }

    pub fn list(&self) -> Vec<StationKey> {
        self.tx.borrow().clone()
    }

    /// Move `key` to the front, dropping the oldest entry past the limit.
    pub async fn record(&self, key: &StationKey) -> anyhow::Result<()> {
        let mut recent = self.list();
        if recent.first() == Some(key) {
            return Ok(());
        }
        recent.retain(|k| k != key);
        recent.insert(0, key.clone());
        recent.truncate(self.limit);
        write_json(&self.path, &recent).await?;
        self.tx.send_replace(recent);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartTab {
    #[default]
    Home,
    Favorites,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub auto_play_on_start: bool,
    #[serde(default)]
    pub start_tab: StartTab,
    #[serde(default)]
    pub theme_mode: ThemeMode,
    #[serde(default = "default_ui_scale")]
    pub ui_scale: f32,
}

fn default_ui_scale() -> f32 {
    1.0
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_play_on_start: false,
            start_tab: StartTab::default(),
            theme_mode: ThemeMode::default(),
            ui_scale: default_ui_scale(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    tx: watch::Sender<AppSettings>,
}

impl SettingsStore {
    pub fn open(path: PathBuf) -> Self {
        let settings: AppSettings = load_json_or_default(&path);
        let (tx, _) = watch::channel(settings);
        Self { path, tx }
    }

    pub fn get(&self) -> AppSettings {
        self.tx.borrow().clone()
    }

    pub async fn update(&self, f: impl FnOnce(&mut AppSettings)) -> anyhow::Result<()> {
        let mut settings = self.get();
        f(&mut settings);
        write_json(&self.path, &settings).await?;
        self.tx.send_replace(settings);
        Ok(())
    }
}

fn dedup(keys: Vec<StationKey>) -> Vec<StationKey> {
    let mut out: Vec<StationKey> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}
