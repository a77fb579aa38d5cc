//! Group scheduler
//!
//! One tick inspects the aggregate client status and moves the whole pool
//! one protocol phase forward. Commands only go out when every client has
//! reached the same phase; anything else is treated as a straggler and
//! handled with the soft-timeout nudge and hard-expiry reset.

use std::time::Duration;

use st_core::config::{CoordinatorConfig, PriorityOrder};
use st_core::traits::CommandSink;
use st_core::{ClientId, ClientStatus, TargetId};
use st_protocol::Command;

use crate::catalog::{select_next, Eligibility};
use crate::registry::Client;
use crate::state::CoordinatorState;

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No clients registered
    Empty,
    /// OPEN broadcast for `target`
    Opened { target: TargetId },
    /// START broadcast
    Started,
    /// Every client is bursting
    Bursting,
    /// CLOSE broadcast; `measured` is the target credited with a measurement
    Closed { measured: Option<TargetId> },
    /// Every client was returned to IDLE
    Reset,
    /// Pool is idle and nothing is eligible
    Waiting,
    /// Pool is out of step
    Recovering {
        /// Clients sent STOP or CLOSE
        nudged: usize,
        /// Clients forced back to IDLE
        expired: usize,
        /// Target charged with a timeout on this tick
        timeout_charged: Option<TargetId>,
    },
}

/// Group scheduler settings
#[derive(Debug, Clone)]
pub struct Scheduler {
    burst_duration: Duration,
    soft_timeout: Duration,
    hard_expiry: Duration,
    order: PriorityOrder,
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(
        burst_duration: Duration,
        soft_timeout: Duration,
        hard_expiry: Duration,
        order: PriorityOrder,
    ) -> Self {
        Self {
            burst_duration,
            soft_timeout,
            hard_expiry,
            order,
        }
    }

    /// Create a scheduler from the coordinator config
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(
            config.burst_duration,
            config.soft_timeout,
            config.hard_expiry,
            config.catalog.order,
        )
    }

    /// Run one tick at `now` (unix millis)
    pub fn tick(
        &self,
        state: &mut CoordinatorState,
        now: u64,
        sink: &dyn CommandSink,
    ) -> TickOutcome {
        let counts = state.clients.counts();
        tracing::debug!("Client status counts: {}", counts);

        if counts.total() == 0 {
            return TickOutcome::Empty;
        }

        if counts.all_settled_idle() {
            if let Some((target, eligibility)) =
                select_next(&state.targets, state.round, self.order)
            {
                return self.open(state, target, eligibility, now, sink);
            }
        }

        if counts.all(ClientStatus::Opened) {
            let duration_secs = self.burst_duration.as_secs();
            tracing::info!("All clients OPENED, starting {}s burst", duration_secs);
            broadcast(state, now, sink, |_, client| Command::Start {
                session: client.session,
                duration_secs,
            });
            return TickOutcome::Started;
        }

        if counts.all(ClientStatus::Started) {
            return TickOutcome::Bursting;
        }

        if counts.all(ClientStatus::Stopped) {
            tracing::info!("All clients STOPPED, closing");
            broadcast(state, now, sink, |_, client| Command::Close {
                session: client.session,
            });
            state.total_measurements += 1;
            // A target already charged a timeout gets no measured credit
            let measured = state.in_flight.take();
            match &measured {
                Some(target) => {
                    state.targets.record_measured(target);
                    tracing::info!(
                        "Measured {} ({} measurements total)",
                        target,
                        state.total_measurements
                    );
                }
                None => tracing::info!(
                    "Burst finished after a timeout ({} measurements total)",
                    state.total_measurements
                ),
            }
            return TickOutcome::Closed { measured };
        }

        if counts.all(ClientStatus::Closed) {
            tracing::info!("All clients CLOSED, returning to IDLE");
            for (_, client) in state.clients.iter_mut() {
                client.force_idle(now);
            }
            return TickOutcome::Reset;
        }

        if counts.all(ClientStatus::Idle) {
            return TickOutcome::Waiting;
        }

        self.recover(state, now, sink)
    }

    fn open(
        &self,
        state: &mut CoordinatorState,
        target: TargetId,
        eligibility: Eligibility,
        now: u64,
        sink: &dyn CommandSink,
    ) -> TickOutcome {
        // An attempt whose clients all dropped back without a verdict
        if let Some(abandoned) = state.in_flight.take() {
            tracing::warn!("Attempt on {} abandoned, counting a timeout", abandoned);
            state.targets.record_timeout(&abandoned);
        }

        if eligibility == Eligibility::Fallback {
            tracing::info!("Round {} exhausted, retrying timed-out {}", state.round, target);
        }
        tracing::info!(
            "All clients idle, opening circuits to {} ({} clients)",
            target,
            state.clients.len()
        );

        let target_str = target.as_str().to_string();
        broadcast(state, now, sink, |_, client| Command::Open {
            target: target_str.clone(),
            partner: client.partner.clone(),
        });
        state.in_flight = Some(target.clone());

        TickOutcome::Opened { target }
    }

    fn recover(&self, state: &mut CoordinatorState, now: u64, sink: &dyn CommandSink) -> TickOutcome {
        let mut nudged = 0;
        let mut expired = 0;
        let mut stuck = false;

        for (id, client) in state.clients.iter_mut() {
            if client.status == ClientStatus::Idle {
                continue;
            }
            let elapsed = client.elapsed(now);

            if client.overdue(self.hard_expiry, now) {
                tracing::warn!(
                    "{} lost in {} for {:?}, forcing IDLE",
                    id,
                    client.status,
                    elapsed
                );
                client.force_idle(now);
                expired += 1;
                stuck = true;
            } else if client.overdue(self.soft_timeout, now) {
                stuck = true;
                if client.holds_session() {
                    let session = client.session;
                    let command = if client.status.is_bursting() {
                        Some(Command::Stop { session })
                    } else if !client.status.is_closing() {
                        Some(Command::Close { session })
                    } else {
                        None
                    };
                    if let Some(command) = command {
                        tracing::info!("{} stuck in {} for {:?}", id, client.status, elapsed);
                        if issue(sink, id, client, command, now) {
                            nudged += 1;
                        }
                    }
                } else {
                    tracing::info!("{} stuck in {} without a session, forcing IDLE", id, client.status);
                    client.force_idle(now);
                    expired += 1;
                }
            }
        }

        let timeout_charged = if stuck { state.in_flight.take() } else { None };
        if let Some(target) = &timeout_charged {
            state.targets.record_timeout(target);
            tracing::info!("Timed out measuring {}", target);
        }

        TickOutcome::Recovering {
            nudged,
            expired,
            timeout_charged,
        }
    }
}

/// Send the command built by `build` to every client
fn broadcast<F>(state: &mut CoordinatorState, now: u64, sink: &dyn CommandSink, build: F)
where
    F: Fn(&ClientId, &Client) -> Command,
{
    for (id, client) in state.clients.iter_mut() {
        let command = build(id, client);
        issue(sink, id, client, command, now);
    }
}

/// Record `command` against `client` and hand it to the sink.
///
/// The status changes even when the send fails, so a dead connection ends
/// up on the timeout path instead of blocking the pool. Returns false if
/// the command is not legal in the client's status.
pub(crate) fn issue(
    sink: &dyn CommandSink,
    id: &ClientId,
    client: &mut Client,
    command: Command,
    now: u64,
) -> bool {
    let Some(verb) = command.verb() else {
        return false;
    };
    if client.issue(verb, now).is_none() {
        tracing::debug!("{}: not sending {} while {}", id, verb, client.status);
        return false;
    }
    if let Err(e) = sink.send(id, command) {
        tracing::warn!("{}: failed to send {}: {}", id, verb, e);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetFilter;
    use crate::dispatcher::{dispatch, ControlEvent};
    use crate::testing::RecordingSink;
    use st_core::CatalogEntry;
    use st_protocol::{SessionId, Verb};

    const SEC: u64 = 1000;

    fn scheduler() -> Scheduler {
        Scheduler::new(
            Duration::from_secs(20),
            Duration::from_secs(25),
            Duration::from_secs(30),
            PriorityOrder::Ascending,
        )
    }

    fn state(clients: usize, targets: &[(&str, u64)]) -> CoordinatorState {
        let mut state = CoordinatorState::fresh(
            (0..clients).map(|i| (ClientId::new(format!("c{}", i)), format!("P{}", i))),
            0,
        );
        state.targets.refresh(
            targets
                .iter()
                .map(|(id, p)| CatalogEntry::new(*id, *p))
                .collect(),
            &TargetFilter::default(),
        );
        state
    }

    fn notify(state: &mut CoordinatorState, client: &str, line: &str, now: u64) {
        dispatch(&mut state.clients, &ControlEvent::new(client, line), now);
    }

    /// Drive every client to OPENED with session 40 + index
    fn open_all(state: &mut CoordinatorState, sink: &RecordingSink, now: u64) {
        let outcome = scheduler().tick(state, now, sink);
        assert!(matches!(outcome, TickOutcome::Opened { .. }));
        for (i, id) in state.clients.ids().iter().enumerate() {
            notify(state, id.as_str(), &format!("NOTICE OPENED {}", 40 + i), now);
        }
    }

    fn statuses(state: &CoordinatorState) -> Vec<ClientStatus> {
        state.clients.iter().map(|(_, c)| c.status).collect()
    }

    #[test]
    fn test_open_broadcast() {
        let mut state = state(2, &[("A", 10), ("B", 5)]);
        let sink = RecordingSink::new();

        let outcome = scheduler().tick(&mut state, SEC, &sink);

        assert_eq!(outcome, TickOutcome::Opened { target: TargetId::new("B") });
        assert_eq!(state.in_flight, Some(TargetId::new("B")));
        assert_eq!(
            sink.sent(),
            vec![
                (
                    ClientId::new("c0"),
                    Command::Open {
                        target: "B".into(),
                        partner: "P0".into()
                    }
                ),
                (
                    ClientId::new("c1"),
                    Command::Open {
                        target: "B".into(),
                        partner: "P1".into()
                    }
                ),
            ]
        );
        assert_eq!(statuses(&state), vec![ClientStatus::Opening; 2]);
    }

    #[test]
    fn test_start_when_all_opened() {
        let mut state = state(3, &[("A", 10)]);
        let sink = RecordingSink::new();
        open_all(&mut state, &sink, SEC);
        sink.clear();

        let outcome = scheduler().tick(&mut state, 2 * SEC, &sink);

        assert_eq!(outcome, TickOutcome::Started);
        let sent = sink.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(_, c)| c.verb() == Some(Verb::Start)));
        assert_eq!(
            sent[1].1,
            Command::Start {
                session: SessionId::new(41),
                duration_secs: 20
            }
        );
        assert_eq!(statuses(&state), vec![ClientStatus::Starting; 3]);
    }

    #[test]
    fn test_no_start_until_every_client_opened() {
        let mut state = state(3, &[("A", 10)]);
        let sink = RecordingSink::new();
        scheduler().tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE OPENED 40", SEC);
        notify(&mut state, "c1", "NOTICE OPENED 41", SEC);
        sink.clear();

        let outcome = scheduler().tick(&mut state, 2 * SEC, &sink);

        assert!(matches!(outcome, TickOutcome::Recovering { nudged: 0, .. }));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_lagging_starter_is_stopped_once() {
        let mut state = state(3, &[("A", 10)]);
        let sink = RecordingSink::new();
        open_all(&mut state, &sink, 0);
        scheduler().tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE STARTED 40", 2 * SEC);
        notify(&mut state, "c1", "NOTICE STARTED 41", 2 * SEC);
        sink.clear();

        // c2 has been STARTING for 25.5s, the others STARTED for 24.5s
        let outcome = scheduler().tick(&mut state, 26 * SEC + 500, &sink);

        assert_eq!(
            outcome,
            TickOutcome::Recovering {
                nudged: 1,
                expired: 0,
                timeout_charged: Some(TargetId::new("A"))
            }
        );
        assert_eq!(
            sink.sent(),
            vec![(
                ClientId::new("c2"),
                Command::Stop {
                    session: SessionId::new(42)
                }
            )]
        );
        assert_eq!(
            state.clients.get(&ClientId::new("c2")).unwrap().status,
            ClientStatus::Stopping
        );
        let target = state.targets.get(&TargetId::new("A")).unwrap();
        assert_eq!(target.timeout_count, 1);

        // The others go stuck on later ticks of the same attempt
        sink.clear();
        let outcome = scheduler().tick(&mut state, 28 * SEC, &sink);
        assert!(matches!(
            outcome,
            TickOutcome::Recovering {
                nudged: 2,
                timeout_charged: None,
                ..
            }
        ));
        assert_eq!(state.targets.get(&TargetId::new("A")).unwrap().timeout_count, 1);
    }

    #[test]
    fn test_full_cycle_records_measurement() {
        let mut state = state(2, &[("A", 10)]);
        let sink = RecordingSink::new();
        let scheduler = scheduler();
        open_all(&mut state, &sink, 0);

        assert_eq!(scheduler.tick(&mut state, SEC, &sink), TickOutcome::Started);
        notify(&mut state, "c0", "NOTICE STARTED 40", SEC);
        notify(&mut state, "c1", "NOTICE STARTED 41", SEC);
        assert_eq!(scheduler.tick(&mut state, 2 * SEC, &sink), TickOutcome::Bursting);

        notify(&mut state, "c0", "NOTICE STOPPED 40", 21 * SEC);
        // CLOSE must wait for the second client
        assert!(matches!(
            scheduler.tick(&mut state, 21 * SEC, &sink),
            TickOutcome::Recovering { .. }
        ));
        assert_eq!(state.targets.get(&TargetId::new("A")).unwrap().measured_count, 0);

        notify(&mut state, "c1", "NOTICE STOPPED 41", 21 * SEC);
        sink.clear();
        assert_eq!(
            scheduler.tick(&mut state, 22 * SEC, &sink),
            TickOutcome::Closed {
                measured: Some(TargetId::new("A"))
            }
        );
        assert_eq!(sink.sent().len(), 2);
        assert_eq!(state.total_measurements, 1);
        assert_eq!(state.in_flight, None);
        let target = state.targets.get(&TargetId::new("A")).unwrap();
        assert_eq!((target.measured_count, target.timeout_count), (1, 0));

        notify(&mut state, "c0", "NOTICE CLOSED 40", 22 * SEC);
        notify(&mut state, "c1", "NOTICE CLOSED 41", 22 * SEC);

        // Only target measured for round 1
        assert_eq!(scheduler.tick(&mut state, 23 * SEC, &sink), TickOutcome::Reset);
        assert_eq!(scheduler.tick(&mut state, 24 * SEC, &sink), TickOutcome::Waiting);
        for (_, client) in state.clients.iter() {
            assert!(client.session.is_none());
        }
    }

    #[test]
    fn test_closed_pool_opens_next_target_directly() {
        let mut state = state(1, &[("A", 10), ("B", 20)]);
        let sink = RecordingSink::new();
        let scheduler = scheduler();
        open_all(&mut state, &sink, 0);
        scheduler.tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE STARTED 40", SEC);
        notify(&mut state, "c0", "NOTICE STOPPED 40", 21 * SEC);
        scheduler.tick(&mut state, 21 * SEC, &sink);
        notify(&mut state, "c0", "NOTICE CLOSED 40", 22 * SEC);

        let outcome = scheduler.tick(&mut state, 22 * SEC, &sink);

        assert_eq!(outcome, TickOutcome::Opened { target: TargetId::new("B") });
    }

    #[test]
    fn test_hard_expiry_forces_idle() {
        let mut state = state(2, &[("A", 10)]);
        let sink = RecordingSink::new();
        open_all(&mut state, &sink, 0);
        scheduler().tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE STARTED 40", SEC);

        // c1 never confirmed START; skip straight past both thresholds
        let outcome = scheduler().tick(&mut state, 40 * SEC, &sink);

        assert!(matches!(
            outcome,
            TickOutcome::Recovering {
                expired: 2,
                timeout_charged: Some(_),
                ..
            }
        ));
        for (_, client) in state.clients.iter() {
            assert_eq!(client.status, ClientStatus::Idle);
            assert!(client.session.is_none());
        }
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_stuck_opening_without_session_goes_idle() {
        let mut state = state(2, &[("A", 10)]);
        let sink = RecordingSink::new();
        scheduler().tick(&mut state, 0, &sink);
        notify(&mut state, "c0", "NOTICE OPENED 40", SEC);
        sink.clear();

        let outcome = scheduler().tick(&mut state, 26 * SEC, &sink);

        // c1 still OPENING with no session; c0 OPENED for 25s exactly
        assert_eq!(
            outcome,
            TickOutcome::Recovering {
                nudged: 0,
                expired: 1,
                timeout_charged: Some(TargetId::new("A"))
            }
        );
        assert_eq!(
            state.clients.get(&ClientId::new("c1")).unwrap().status,
            ClientStatus::Idle
        );
    }

    #[test]
    fn test_timeout_retried_in_fallback() {
        let mut state = state(1, &[("A", 10)]);
        let sink = RecordingSink::new();
        scheduler().tick(&mut state, 0, &sink);

        // Never confirms OPEN
        scheduler().tick(&mut state, 26 * SEC, &sink);
        assert_eq!(state.targets.get(&TargetId::new("A")).unwrap().timeout_count, 1);

        let outcome = scheduler().tick(&mut state, 27 * SEC, &sink);
        assert_eq!(outcome, TickOutcome::Opened { target: TargetId::new("A") });
    }

    #[test]
    fn test_close_after_nudge_still_counts_measurement() {
        let mut state = state(2, &[("A", 10)]);
        let sink = RecordingSink::new();
        let scheduler = scheduler();
        open_all(&mut state, &sink, 0);
        scheduler.tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE STARTED 40", 2 * SEC);

        // c1 never confirms START and is nudged
        assert!(matches!(
            scheduler.tick(&mut state, 26 * SEC + 500, &sink),
            TickOutcome::Recovering {
                nudged: 1,
                timeout_charged: Some(_),
                ..
            }
        ));
        notify(&mut state, "c0", "NOTICE STOPPED 40", 27 * SEC);
        notify(&mut state, "c1", "NOTICE STOPPED 41", 27 * SEC);

        assert_eq!(
            scheduler.tick(&mut state, 27 * SEC, &sink),
            TickOutcome::Closed { measured: None }
        );
        assert_eq!(state.total_measurements, 1);
        let target = state.targets.get(&TargetId::new("A")).unwrap();
        assert_eq!((target.measured_count, target.timeout_count), (0, 1));
    }

    #[test]
    fn test_attempts_grow_by_one_per_outcome() {
        let mut state = state(1, &[("A", 10)]);
        let sink = RecordingSink::new();
        let scheduler = scheduler();
        let counts = |state: &CoordinatorState| {
            let a = state.targets.get(&TargetId::new("A")).unwrap();
            (a.measured_count, a.timeout_count)
        };

        // Full cycle: one measurement
        open_all(&mut state, &sink, 0);
        assert_eq!(counts(&state), (0, 0));
        scheduler.tick(&mut state, SEC, &sink);
        notify(&mut state, "c0", "NOTICE STARTED 40", SEC);
        notify(&mut state, "c0", "NOTICE STOPPED 40", 21 * SEC);
        scheduler.tick(&mut state, 21 * SEC, &sink);
        assert_eq!(counts(&state), (1, 0));
        notify(&mut state, "c0", "NOTICE CLOSED 40", 22 * SEC);
        assert_eq!(scheduler.tick(&mut state, 22 * SEC, &sink), TickOutcome::Reset);
        assert_eq!(counts(&state), (1, 0));

        // Stuck round: one timeout
        state.round = 2;
        scheduler.tick(&mut state, 30 * SEC, &sink);
        assert_eq!(counts(&state), (1, 0));
        scheduler.tick(&mut state, 56 * SEC, &sink);
        assert_eq!(counts(&state), (1, 1));

        // Hard expiry: one timeout
        state.round = 3;
        assert!(matches!(
            scheduler.tick(&mut state, 60 * SEC, &sink),
            TickOutcome::Opened { .. }
        ));
        assert!(matches!(
            scheduler.tick(&mut state, 100 * SEC, &sink),
            TickOutcome::Recovering { expired: 1, .. }
        ));
        assert_eq!(counts(&state), (1, 2));

        // Circuit collapses before any stuck tick: charged at the next OPEN
        state.round = 4;
        scheduler.tick(&mut state, 110 * SEC, &sink);
        notify(&mut state, "c0", "NOTICE OPENED 50", 110 * SEC);
        notify(&mut state, "c0", "NOTICE CLOSED 50", 110 * SEC);
        assert_eq!(counts(&state), (1, 2));
        assert_eq!(
            scheduler.tick(&mut state, 111 * SEC, &sink),
            TickOutcome::Opened {
                target: TargetId::new("A")
            }
        );
        assert_eq!(counts(&state), (1, 3));
        assert_eq!(state.in_flight, Some(TargetId::new("A")));
    }

    #[test]
    fn test_failed_send_still_advances_status() {
        let mut state = state(1, &[("A", 10)]);
        let sink = RecordingSink::failing();

        scheduler().tick(&mut state, 0, &sink);

        assert_eq!(statuses(&state), vec![ClientStatus::Opening]);
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_empty_pool() {
        let mut state = state(0, &[("A", 10)]);
        let sink = RecordingSink::new();
        assert_eq!(scheduler().tick(&mut state, 0, &sink), TickOutcome::Empty);
    }
}
