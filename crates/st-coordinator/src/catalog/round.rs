//! Round advancement policies

use st_core::config::RoundPolicyConfig;

use super::Catalog;

/// Decides when the process-wide round counter moves forward
pub trait RoundPolicy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// New round number, or `None` to stay in `round`.
    ///
    /// Only consulted while no target is in flight.
    fn next_round(&self, catalog: &Catalog, round: u32) -> Option<u32>;
}

/// Round changes only when an operator edits the checkpoint
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRound;

impl RoundPolicy for FixedRound {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn next_round(&self, _catalog: &Catalog, _round: u32) -> Option<u32> {
        None
    }
}

/// Advance once every listed target has been measured `round` times
#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceWhenExhausted {
    /// Last round to run
    pub max_round: Option<u32>,
}

impl RoundPolicy for AdvanceWhenExhausted {
    fn name(&self) -> &'static str {
        "exhausted"
    }

    fn next_round(&self, catalog: &Catalog, round: u32) -> Option<u32> {
        if catalog.listed_len() == 0 {
            return None;
        }
        if catalog.listed().any(|(_, t)| t.measured_count < round) {
            return None;
        }
        let next = round.checked_add(1)?;
        match self.max_round {
            Some(max) if next > max => None,
            _ => Some(next),
        }
    }
}

/// Build the configured policy
pub fn round_policy_from_config(config: &RoundPolicyConfig) -> Box<dyn RoundPolicy> {
    match config {
        RoundPolicyConfig::Fixed => Box::new(FixedRound),
        RoundPolicyConfig::Exhausted { max_round } => Box::new(AdvanceWhenExhausted {
            max_round: *max_round,
        }),
    }
}
