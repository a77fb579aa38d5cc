//! Target catalog
//!
//! Keeps every target ever seen together with its measurement counters.
//! Each refresh from the feed marks which targets are currently listed;
//! only listed targets are candidates for selection, but counters of
//! targets that drop out of the feed are kept so they resume where they
//! left off if the target comes back.

mod round;
mod selection;
mod source;

pub use round::{round_policy_from_config, AdvanceWhenExhausted, FixedRound, RoundPolicy};
pub use selection::{eligible, remaining, select_next, Eligibility};
pub use source::{catalog_source_from_config, ConsensusCatalogSource, JsonCatalogSource};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use st_core::config::{CatalogConfig, FilterPrecedence};
use st_core::{CatalogEntry, TargetId};

/// One measurement target and its counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Relay nickname from the feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Ranking score from the feed
    #[serde(default)]
    pub priority: u64,
    /// Completed measurements
    #[serde(default)]
    pub measured_count: u32,
    /// Attempts abandoned because a client got stuck
    #[serde(default)]
    pub timeout_count: u32,
    /// Present in the most recent feed refresh. Checkpointed so a resumed
    /// coordinator can keep selecting while the feed is unreadable.
    #[serde(default)]
    pub listed: bool,
}

impl Target {
    /// Attempts of any outcome
    pub fn attempts(&self) -> u32 {
        self.measured_count + self.timeout_count
    }
}

/// Summary of one feed refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Entries admitted and listed
    pub listed: usize,
    /// Entries seen for the first time
    pub added: usize,
    /// Entries rejected by the blacklist or focus list
    pub filtered: usize,
}

/// All known targets, ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    targets: BTreeMap<TargetId, Target>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listing with a fresh feed.
    ///
    /// Entries the filter rejects are neither added nor listed. Counters of
    /// known targets are preserved; priority and nickname are updated.
    pub fn refresh(&mut self, entries: Vec<CatalogEntry>, filter: &TargetFilter) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        for target in self.targets.values_mut() {
            target.listed = false;
        }

        for entry in entries {
            if !filter.admits(&entry.id) {
                summary.filtered += 1;
                continue;
            }

            let target = self.targets.entry(entry.id).or_insert_with(|| {
                summary.added += 1;
                Target::default()
            });
            target.priority = entry.priority;
            if entry.nickname.is_some() {
                target.nickname = entry.nickname;
            }
            if !target.listed {
                target.listed = true;
                summary.listed += 1;
            }
        }

        summary
    }

    /// Get a target by ID
    pub fn get(&self, id: &TargetId) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Get a target by ID for mutation
    pub fn get_mut(&mut self, id: &TargetId) -> Option<&mut Target> {
        self.targets.get_mut(id)
    }

    /// Iterate over every known target
    pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &Target)> {
        self.targets.iter()
    }

    /// Iterate over targets in the current listing
    pub fn listed(&self) -> impl Iterator<Item = (&TargetId, &Target)> {
        self.targets.iter().filter(|(_, t)| t.listed)
    }

    /// Number of targets in the current listing
    pub fn listed_len(&self) -> usize {
        self.listed().count()
    }

    /// Number of known targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Count a completed measurement. Returns false for an unknown target.
    pub fn record_measured(&mut self, id: &TargetId) -> bool {
        match self.targets.get_mut(id) {
            Some(target) => {
                target.measured_count += 1;
                true
            }
            None => false,
        }
    }

    /// Count an abandoned attempt. Returns false for an unknown target.
    pub fn record_timeout(&mut self, id: &TargetId) -> bool {
        match self.targets.get_mut(id) {
            Some(target) => {
                target.timeout_count += 1;
                true
            }
            None => false,
        }
    }
}

/// Blacklist / focus-list admission
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    blacklist: HashSet<TargetId>,
    focus: HashSet<TargetId>,
    precedence: FilterPrecedence,
}

impl TargetFilter {
    /// Build a filter
    pub fn new(
        blacklist: impl IntoIterator<Item = TargetId>,
        focus: impl IntoIterator<Item = TargetId>,
        precedence: FilterPrecedence,
    ) -> Self {
        Self {
            blacklist: blacklist.into_iter().collect(),
            focus: focus.into_iter().collect(),
            precedence,
        }
    }

    /// Build a filter from the catalog section of the config
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(
            config.blacklist.iter().map(TargetId::new),
            config.focus.iter().map(TargetId::new),
            config.precedence,
        )
    }

    /// Whether `id` may be measured
    pub fn admits(&self, id: &TargetId) -> bool {
        let blocked = self.blacklist.contains(id);
        let focused = self.focus.contains(id);

        match self.precedence {
            FilterPrecedence::BlacklistFirst => {
                !blocked && (self.focus.is_empty() || focused)
            }
            FilterPrecedence::FocusFirst => {
                focused || (!blocked && self.focus.is_empty())
            }
        }
    }
}
