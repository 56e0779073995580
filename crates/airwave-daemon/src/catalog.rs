//! Station catalog and now-playing endpoints.
//!
//! The catalog is read from a local `stations.toml` when one exists, otherwise
//! fetched from `<base_url><catalog_path>` and cached until a forced refresh.

use airwave_proto::config::CatalogConfig;
use airwave_proto::station::{load_stations_from_toml, ProgramInfo, SongInfo, Station};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("airwave/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("station file {path:?}: {message}")]
    LocalFile { path: PathBuf, message: String },
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_stations(&self, force_refresh: bool) -> Result<Vec<Station>, FetchError>;
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Current program title at `path`, relative to the base URL.
    async fn program_title(&self, path: &str) -> Result<String, FetchError>;
    /// Current song text at `path`, relative to the base URL.
    async fn song_title(&self, path: &str) -> Result<String, FetchError>;
}

pub struct RadioApi {
    http_client: reqwest::Client,
    base_url: String,
    catalog_path: String,
    stations_toml: Option<PathBuf>,
    cache: Mutex<Option<Vec<Station>>>,
}

impl RadioApi {
    pub fn new(config: &CatalogConfig) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            catalog_path: config.catalog_path.clone(),
            stations_toml: Some(config.stations_toml.clone()),
            cache: Mutex::new(None),
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.url_for(path);
        debug!(url = %url, "GET");
        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Decode { url, source })
    }

    fn load_local(&self) -> Option<Result<Vec<Station>, FetchError>> {
        let path = self.stations_toml.as_ref().filter(|p| p.exists())?;
        info!("Loading stations from {:?}", path);
        Some(
            load_stations_from_toml(path).map_err(|e| FetchError::LocalFile {
                path: path.clone(),
                message: e.to_string(),
            }),
        )
    }
}

#[async_trait]
impl CatalogSource for RadioApi {
    async fn fetch_stations(&self, force_refresh: bool) -> Result<Vec<Station>, FetchError> {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(stations) = cache.as_ref() {
                return Ok(stations.clone());
            }
        }

        let stations = match self.load_local() {
            Some(local) => local?,
            None => self.get_json::<Vec<Station>>(&self.catalog_path).await?,
        };
        info!("Catalog: {} stations", stations.len());
        *cache = Some(stations.clone());
        Ok(stations)
    }
}

#[async_trait]
impl MetadataSource for RadioApi {
    async fn program_title(&self, path: &str) -> Result<String, FetchError> {
        Ok(self.get_json::<ProgramInfo>(path).await?.title)
    }

    async fn song_title(&self, path: &str) -> Result<String, FetchError> {
        Ok(self.get_json::<SongInfo>(path).await?.song)
    }
}
