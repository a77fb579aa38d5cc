//! The coordinator aggregate
//!
//! Owns the [`CoordinatorState`] behind a single async mutex. Event
//! dispatch, scheduler ticks, heartbeats and shutdown all take that lock,
//! so every state change happens in one total order no matter how many
//! control connections deliver events concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use st_core::config::CoordinatorConfig;
use st_core::time::current_time_millis;
use st_core::traits::{CatalogSource, CommandSink};
use st_protocol::Command;

use crate::catalog::{remaining, round_policy_from_config, RoundPolicy, TargetFilter};
use crate::checkpoint::CheckpointStore;
use crate::dispatcher::{dispatch, ControlEvent, DispatchOutcome};
use crate::scheduler::{issue, Scheduler, TickOutcome};
use crate::state::CoordinatorState;

/// Progress reported by a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Whether the catalog feed was read successfully
    pub refreshed: bool,
    /// Round after the heartbeat
    pub round: u32,
    /// Listed targets still waiting for an attempt in this round
    pub remaining: usize,
    /// Listed targets
    pub listed: usize,
    /// Completed group measurements
    pub total_measurements: u64,
}

/// Drives the client pool
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    scheduler: Scheduler,
    filter: TargetFilter,
    round_policy: Box<dyn RoundPolicy>,
    catalog: Box<dyn CatalogSource>,
    store: CheckpointStore,
    sink: Arc<dyn CommandSink>,
    tick_interval: Duration,
    heartbeat_interval: Duration,
}

impl Coordinator {
    /// Create a coordinator around `state`
    pub fn new(
        config: &CoordinatorConfig,
        state: CoordinatorState,
        catalog: Box<dyn CatalogSource>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            scheduler: Scheduler::from_config(config),
            filter: TargetFilter::from_config(&config.catalog),
            round_policy: round_policy_from_config(&config.round),
            catalog,
            store: CheckpointStore::new(&config.checkpoint_path),
            sink,
            tick_interval: config.tick_interval,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> CoordinatorState {
        self.state.lock().await.clone()
    }

    /// Apply a notification from a control connection
    pub async fn handle_event(&self, event: ControlEvent) -> DispatchOutcome {
        self.handle_event_at(event, current_time_millis()).await
    }

    /// Apply a notification as if received at `now`
    pub async fn handle_event_at(&self, event: ControlEvent, now: u64) -> DispatchOutcome {
        let mut state = self.state.lock().await;
        dispatch(&mut state.clients, &event, now)
    }

    /// Run one scheduler tick and checkpoint the result
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(current_time_millis()).await
    }

    /// Run one scheduler tick at `now`
    pub async fn tick_at(&self, now: u64) -> TickOutcome {
        let mut state = self.state.lock().await;
        let outcome = self.scheduler.tick(&mut state, now, self.sink.as_ref());
        self.checkpoint(&state);
        outcome
    }

    /// Refresh the catalog, maybe advance the round, log progress and
    /// checkpoint
    pub async fn heartbeat(&self) -> HeartbeatReport {
        // The feed is read without holding the lock
        let fetched = self.catalog.fetch().await;

        let mut state = self.state.lock().await;
        let refreshed = match fetched {
            Ok(entries) => {
                let summary = state.targets.refresh(entries, &self.filter);
                tracing::debug!(
                    "Catalog refreshed from {}: {} listed, {} new, {} filtered",
                    self.catalog.describe(),
                    summary.listed,
                    summary.added,
                    summary.filtered
                );
                true
            }
            Err(e) => {
                tracing::warn!("Keeping previous catalog: {}", e);
                false
            }
        };

        if state.in_flight.is_none() {
            if let Some(next) = self.round_policy.next_round(&state.targets, state.round) {
                tracing::info!(
                    "Round {} complete, advancing to round {} ({} policy)",
                    state.round,
                    next,
                    self.round_policy.name()
                );
                state.round = next;
            }
        }

        let report = HeartbeatReport {
            refreshed,
            round: state.round,
            remaining: remaining(&state.targets, state.round),
            listed: state.targets.listed_len(),
            total_measurements: state.total_measurements,
        };
        tracing::info!(
            "heartbeat: performed {} measurements, {}/{} targets remain in round {}",
            report.total_measurements,
            report.remaining,
            report.listed,
            report.round
        );

        self.checkpoint(&state);
        report
    }

    /// Ask every client holding a session to stop and close it, then
    /// checkpoint.
    ///
    /// Send failures are logged and do not stop the remaining clients from
    /// being shut down.
    pub async fn shutdown(&self) {
        let now = current_time_millis();
        let mut state = self.state.lock().await;
        tracing::info!("Shutting down {} clients", state.clients.len());

        for (id, client) in state.clients.iter_mut() {
            if !client.holds_session() {
                continue;
            }
            let session = client.session;
            if client.status.is_bursting() {
                issue(self.sink.as_ref(), id, client, Command::Stop { session }, now);
                issue(self.sink.as_ref(), id, client, Command::Close { session }, now);
            } else if !client.status.is_closing() {
                issue(self.sink.as_ref(), id, client, Command::Close { session }, now);
            }
        }

        self.checkpoint(&state);
    }

    fn checkpoint(&self, state: &CoordinatorState) {
        if let Err(e) = self.store.save(state) {
            tracing::warn!("Failed to write checkpoint: {}", e);
        }
    }

    /// Main loop: dispatch events, tick and heartbeat until cancelled,
    /// then shut the clients down.
    ///
    /// A tick that overruns its interval delays the next one rather than
    /// letting ticks pile up.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ControlEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Coordinator running (tick {:?}, heartbeat {:?})",
            self.tick_interval,
            self.heartbeat_interval
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("Coordinator stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        self.shutdown().await;
    }
}
