//! Coordinator state aggregate

use serde::{Deserialize, Serialize};

use st_core::{ClientId, TargetId};

use crate::catalog::Catalog;
use crate::registry::{Client, ClientRegistry};

/// Everything the coordinator owns.
///
/// This is also the checkpoint format. `in_flight` names the target whose
/// attempt has been started but whose outcome (measured or timed out) has
/// not been recorded yet; there is never more than one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorState {
    /// Process-wide attempt threshold
    pub round: u32,
    /// Completed group measurements
    #[serde(default)]
    pub total_measurements: u64,
    /// Target of the attempt in progress
    #[serde(rename = "in_flight_target", default)]
    pub in_flight: Option<TargetId>,
    /// Catalog with counters
    #[serde(default)]
    pub targets: Catalog,
    /// Per-client protocol state
    #[serde(default)]
    pub clients: ClientRegistry,
}

impl CoordinatorState {
    /// Fresh state for round 1
    pub fn fresh<I>(clients: I, now: u64) -> Self
    where
        I: IntoIterator<Item = (ClientId, String)>,
    {
        let mut registry = ClientRegistry::new();
        for (id, partner) in clients {
            registry.insert(id, Client::new(partner, now));
        }

        Self {
            round: 1,
            total_measurements: 0,
            in_flight: None,
            targets: Catalog::new(),
            clients: registry,
        }
    }

    /// Resume from a checkpoint.
    ///
    /// Round, catalog counters and the measurement total are taken from the
    /// snapshot. Clients are rebuilt from `clients` as IDLE with no session,
    /// since their connections are new, and the in-flight attempt is
    /// dropped.
    pub fn resume<I>(snapshot: CoordinatorState, clients: I, now: u64) -> Self
    where
        I: IntoIterator<Item = (ClientId, String)>,
    {
        let mut state = Self::fresh(clients, now);
        state.round = snapshot.round.max(1);
        state.total_measurements = snapshot.total_measurements;
        state.targets = snapshot.targets;
        state
    }
}
