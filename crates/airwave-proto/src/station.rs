use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a station: its relative stream path.  Survives catalog
/// refreshes, so it is what favorites, recents and the persisted queue store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationKey(String);

impl StationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One catalog entry.  Field names on the wire match the catalog JSON
/// (`radioStations.json`): `title`, `city`, `url`, `program`, `song`, `artwork`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub title: String,
    #[serde(rename = "city")]
    pub city_group: String,
    /// Relative to the catalog base URL.
    #[serde(rename = "url")]
    pub stream_path: String,
    #[serde(rename = "program", default, skip_serializing_if = "Option::is_none")]
    pub program_info_path: Option<String>,
    #[serde(rename = "song", default, skip_serializing_if = "Option::is_none")]
    pub song_info_path: Option<String>,
    #[serde(rename = "artwork", default, skip_serializing_if = "Option::is_none")]
    pub artwork_uri: Option<String>,
}

impl Station {
    pub fn key(&self) -> StationKey {
        StationKey(self.stream_path.clone())
    }

    pub fn has_key(&self, key: &StationKey) -> bool {
        self.stream_path == key.0
    }

    pub fn stream_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.stream_path)
    }

    /// Program-info path, if the station declares a non-empty one.
    pub fn program_path(&self) -> Option<&str> {
        self.program_info_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Song-info path, if the station declares a non-empty one.
    pub fn song_path(&self) -> Option<&str> {
        self.song_info_path.as_deref().filter(|p| !p.is_empty())
    }
}

/// Body of a program-info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub title: String,
}

/// Body of a song-info endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongInfo {
    pub song: String,
}

/// Compare two station lists by identity, ignoring metadata differences.
pub fn same_keys(a: &[Station], b: &[Station]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.stream_path == y.stream_path)
}

pub fn parse_stations_from_json_str(content: &str) -> anyhow::Result<Vec<Station>> {
    Ok(serde_json::from_str(content)?)
}

// ── TOML station loader ───────────────────────────────────────────────────────

/// Matches the TOML `[[station]]` table of a local catalog override.
#[derive(Debug, Deserialize)]
struct TomlStationFile {
    station: Vec<TomlStation>,
}

#[derive(Debug, Deserialize)]
struct TomlStation {
    title: String,
    city: String,
    url: String,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    artwork: Option<String>,
}

pub fn load_stations_from_toml(path: &std::path::Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let stations = file
        .station
        .into_iter()
        .map(|s| Station {
            title: s.title,
            city_group: s.city,
            stream_path: s.url,
            program_info_path: s.program,
            song_info_path: s.song,
            artwork_uri: s.artwork,
        })
        .collect();
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_json_with_optional_fields() {
        let json = r#"[
            {"title": "KBS 1Radio", "city": "seoul", "url": "/kbs/1radio.m3u8", "program": "/kbs/1radio/program"},
            {"title": "Busan FM", "city": "busan", "url": "/busan/fm.m3u8", "song": "", "artwork": "https://img/busan.png"}
        ]"#;
        let stations = parse_stations_from_json_str(json).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].key(), StationKey::from("/kbs/1radio.m3u8"));
        assert_eq!(stations[0].program_path(), Some("/kbs/1radio/program"));
        assert_eq!(stations[0].song_path(), None);
        // empty path counts as absent
        assert_eq!(stations[1].song_path(), None);
        assert_eq!(stations[1].artwork_uri.as_deref(), Some("https://img/busan.png"));
    }

    #[test]
    fn parses_toml_override() {
        let toml = r#"
            [[station]]
            title = "MBC FM4U"
            city = "seoul"
            url = "/mbc/fm4u.m3u8"
            song = "/mbc/fm4u/song"
        "#;
        let stations = parse_stations_from_toml_str(toml).unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].city_group, "seoul");
        assert_eq!(stations[0].song_path(), Some("/mbc/fm4u/song"));
    }

    #[test]
    fn stream_url_joins_base() {
        let s = parse_stations_from_json_str(r#"[{"title":"A","city":"c","url":"/a.m3u8"}]"#)
            .unwrap()
            .remove(0);
        assert_eq!(s.stream_url("https://radio.example/"), "https://radio.example/a.m3u8");
    }
}
