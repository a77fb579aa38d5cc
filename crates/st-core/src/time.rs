//! Wall clock for client status timestamps
//!
//! Every status change is stamped with Unix milliseconds. Plain integers
//! keep the checkpoint file readable and let tests drive the clock by hand.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix milliseconds, the unit of every status timestamp
pub type Millis = u64;

/// Current wall-clock time. A clock set before 1970 reads as 0.
pub fn current_time_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// How long ago `stamp` was, seen from `now`.
///
/// A stamp in the future (clock stepped backwards) counts as no time at all,
/// so a client is never timed out because of a clock adjustment.
pub fn elapsed_between(stamp: Millis, now: Millis) -> Duration {
    Duration::from_millis(now.saturating_sub(stamp))
}

/// Whether more than `limit` has passed since `stamp`
pub fn is_older_than(stamp: Millis, limit: Duration, now: Millis) -> bool {
    elapsed_between(stamp, now) > limit
}
