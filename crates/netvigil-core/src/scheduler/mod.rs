// Bounded-concurrency scheduling primitives and cycle pacing.

mod queue;

use std::time::Duration;

pub use queue::{Deadline, run_bounded, with_deadline};

/// Delay before the next cycle: `max(0, interval - elapsed)`.
///
/// A cycle that overran its interval is followed immediately.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Whether cycle number `cycle` (zero-based) is a detailed one.
///
/// The first cycle is always detailed, then every `every`th.
pub fn is_detailed_cycle(cycle: u64, every: u32) -> bool {
    cycle % u64::from(every.max(1)) == 0
}
