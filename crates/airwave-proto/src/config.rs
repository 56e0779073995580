use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
}

/// Where the daemon keeps its persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_favorites_file")]
    pub favorites_file: PathBuf,
    #[serde(default = "default_recent_file")]
    pub recent_file: PathBuf,
    #[serde(default = "default_settings_file")]
    pub settings_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Station catalog source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Base URL every stream / program / song path is relative to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    /// Local TOML station file; used instead of the remote catalog when present.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    #[serde(default = "default_artwork")]
    pub default_artwork: String,
    /// Seconds between catalog fetch attempts while no stations are known.
    #[serde(default = "default_catalog_retry_secs")]
    pub retry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Delay between restoring the queue and resuming playback on launch.
    #[serde(default = "default_restore_delay_ms")]
    pub restore_delay_ms: u64,
    #[serde(default = "default_recovery_base_ms")]
    pub recovery_base_ms: u64,
    #[serde(default = "default_recovery_cap_ms")]
    pub recovery_cap_ms: u64,
    #[serde(default = "default_recovery_max_attempts")]
    pub recovery_max_attempts: u8,
    /// Artist text shown while no program title is known.
    #[serde(default = "default_artist")]
    pub default_artist: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_song_poll_secs")]
    pub song_poll_secs: u64,
    #[serde(default = "default_song_debounce_secs")]
    pub song_debounce_secs: u64,
    #[serde(default = "default_program_grid_minutes")]
    pub program_grid_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseConfig {
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
    /// Display label per city group id.
    #[serde(default = "default_city_labels")]
    pub city_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            favorites_file: default_favorites_file(),
            recent_file: default_recent_file(),
            settings_file: default_settings_file(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            http_enabled: default_http_enabled(),
            http_port: default_http_port(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            catalog_path: default_catalog_path(),
            stations_toml: default_stations_toml(),
            default_artwork: default_artwork(),
            retry_secs: default_catalog_retry_secs(),
        }
    }
}

impl CatalogConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            restore_delay_ms: default_restore_delay_ms(),
            recovery_base_ms: default_recovery_base_ms(),
            recovery_cap_ms: default_recovery_cap_ms(),
            recovery_max_attempts: default_recovery_max_attempts(),
            default_artist: default_artist(),
        }
    }
}

impl PlaybackConfig {
    pub fn restore_delay(&self) -> Duration {
        Duration::from_millis(self.restore_delay_ms)
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            song_poll_secs: default_song_poll_secs(),
            song_debounce_secs: default_song_debounce_secs(),
            program_grid_minutes: default_program_grid_minutes(),
        }
    }
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            city_labels: default_city_labels(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("playback.json")
}

fn default_favorites_file() -> PathBuf {
    platform::data_dir().join("favorites.json")
}

fn default_recent_file() -> PathBuf {
    platform::data_dir().join("recent.json")
}

fn default_settings_file() -> PathBuf {
    platform::data_dir().join("settings.json")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8990
}

fn default_base_url() -> String {
    "https://radio.yuntae.in".to_string()
}

fn default_catalog_path() -> String {
    "/radioStations.json".to_string()
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_artwork() -> String {
    "https://i.imgur.com/u7N8nbD.png".to_string()
}

fn default_catalog_retry_secs() -> u64 {
    30
}

fn default_restore_delay_ms() -> u64 {
    500
}

fn default_recovery_base_ms() -> u64 {
    500
}

fn default_recovery_cap_ms() -> u64 {
    3000
}

fn default_recovery_max_attempts() -> u8 {
    3
}

fn default_artist() -> String {
    "Live radio".to_string()
}

fn default_song_poll_secs() -> u64 {
    30
}

fn default_song_debounce_secs() -> u64 {
    60
}

fn default_program_grid_minutes() -> u32 {
    5
}

fn default_recent_limit() -> usize {
    10
}

fn default_city_labels() -> BTreeMap<String, String> {
    [
        ("seoul", "수도권"),
        ("busan", "부산·울산·경남"),
        ("daegu", "대구·경북"),
        ("gwangju", "광주·전남"),
        ("daejeon", "대전·세종·충남"),
        ("jeonbuk", "전북"),
        ("gangwon", "강원"),
        ("chungbuk", "충북"),
        ("jeju", "제주"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_volume() -> f32 {
    0.8
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
