//! Target catalog configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Where targets come from and which of them are measured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Path of the feed file, re-read at every heartbeat
    pub path: PathBuf,

    /// Feed file format
    pub format: CatalogFormat,

    /// Targets that are never measured
    pub blacklist: BTreeSet<String>,

    /// When non-empty, only these targets are measured
    pub focus: BTreeSet<String>,

    /// Which list wins for a target named in both
    pub precedence: FilterPrecedence,

    /// Priority-score direction used to pick the next target
    pub order: PriorityOrder,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: super::default_config_dir().join("catalog.json"),
            format: CatalogFormat::Json,
            blacklist: BTreeSet::new(),
            focus: BTreeSet::new(),
            precedence: FilterPrecedence::BlacklistFirst,
            order: PriorityOrder::Ascending,
        }
    }
}

/// Catalog feed file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogFormat {
    /// `{ "<fingerprint>": { "priority": n, "nickname": "..." } }`
    Json,
    /// Cached network-status consensus document
    Consensus,
}

/// Precedence between blacklist and focus list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPrecedence {
    /// A blacklisted target is excluded even when it is focused
    #[default]
    BlacklistFirst,
    /// A focused target is measured even when it is blacklisted
    FocusFirst,
}

/// Order in which eligible targets are picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Lowest priority score first
    #[default]
    Ascending,
    /// Highest priority score first
    Descending,
}
