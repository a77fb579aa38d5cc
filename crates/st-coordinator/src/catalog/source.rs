//! Catalog feed implementations

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine as _;
use serde::Deserialize;

use st_core::config::{CatalogConfig, CatalogFormat};
use st_core::error::CatalogError;
use st_core::traits::CatalogSource;
use st_core::{CatalogEntry, TargetId};

async fn read_feed(path: &Path) -> Result<String, CatalogError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// JSON map of fingerprint to `{ "priority": n, "nickname": "..." }`
pub struct JsonCatalogSource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct JsonEntry {
    #[serde(default)]
    priority: u64,
    #[serde(default)]
    nickname: Option<String>,
}

impl JsonCatalogSource {
    /// Create a source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse feed content
    pub fn parse(path: &Path, content: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let raw: BTreeMap<String, JsonEntry> =
            serde_json::from_str(content).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(raw
            .into_iter()
            .map(|(id, entry)| CatalogEntry {
                id: TargetId::new(id),
                priority: entry.priority,
                nickname: entry.nickname,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogSource for JsonCatalogSource {
    fn describe(&self) -> String {
        format!("json catalog {:?}", self.path)
    }

    async fn fetch(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let content = read_feed(&self.path).await?;
        Self::parse(&self.path, &content)
    }
}

/// Cached network-status consensus.
///
/// Each router is an `r` line (nickname, then base64 identity digest)
/// followed by a `w Bandwidth=N` line; the bandwidth becomes the priority
/// score and the identity becomes an upper-case hex fingerprint.
pub struct ConsensusCatalogSource {
    path: PathBuf,
}

impl ConsensusCatalogSource {
    /// Create a source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse consensus content
    pub fn parse(path: &Path, content: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut entries: Vec<CatalogEntry> = Vec::new();
        let mut current_valid = false;

        for (lineno, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("r") => {
                    let (Some(nickname), Some(identity)) = (fields.next(), fields.next()) else {
                        return Err(CatalogError::Parse {
                            path: path.to_path_buf(),
                            message: format!("line {}: truncated router line", lineno + 1),
                        });
                    };
                    match decode_identity(identity) {
                        Some(fingerprint) => {
                            entries.push(CatalogEntry {
                                id: TargetId::new(fingerprint),
                                priority: 0,
                                nickname: Some(nickname.to_string()),
                            });
                            current_valid = true;
                        }
                        None => {
                            tracing::warn!(
                                "Skipping router {} with undecodable identity on line {}",
                                nickname,
                                lineno + 1
                            );
                            current_valid = false;
                        }
                    }
                }
                Some("w") if current_valid => {
                    let bandwidth = fields
                        .find_map(|f| f.strip_prefix("Bandwidth="))
                        .and_then(|v| v.parse::<u64>().ok());
                    if let (Some(bandwidth), Some(entry)) = (bandwidth, entries.last_mut()) {
                        entry.priority = bandwidth;
                    }
                }
                _ => {}
            }
        }

        Ok(entries)
    }
}

fn decode_identity(identity: &str) -> Option<String> {
    let bytes = general_purpose::STANDARD_NO_PAD
        .decode(identity.trim_end_matches('='))
        .ok()?;
    if bytes.len() != 20 {
        return None;
    }
    Some(hex::encode_upper(bytes))
}

#[async_trait]
impl CatalogSource for ConsensusCatalogSource {
    fn describe(&self) -> String {
        format!("consensus {:?}", self.path)
    }

    async fn fetch(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let content = read_feed(&self.path).await?;
        Self::parse(&self.path, &content)
    }
}

/// Build the configured feed
pub fn catalog_source_from_config(config: &CatalogConfig) -> Box<dyn CatalogSource> {
    match config.format {
        CatalogFormat::Json => Box::new(JsonCatalogSource::new(&config.path)),
        CatalogFormat::Consensus => Box::new(ConsensusCatalogSource::new(&config.path)),
    }
}
