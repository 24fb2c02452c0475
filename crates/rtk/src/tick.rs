//! Tick arithmetic, wait policies and the ticker thread.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::kernel::Shared;

/// Kernel time in ticks. Wraps around.
pub type Tick = u32;

/// Reserved "wait forever" value; never a valid timer period.
pub const MAX_DELAY: Tick = Tick::MAX;

/// How long a caller is willing to wait for room in the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    Ticks(Tick),
}

impl Wait {
    /// Do not wait at all.
    pub const NONE: Wait = Wait::Ticks(0);

    /// Whether a wait that started at `since` has run out at `now`.
    pub(crate) fn expired(self, since: u64, now: u64) -> bool {
        match self {
            Wait::Forever => false,
            Wait::Ticks(ticks) => now.saturating_sub(since) >= u64::from(ticks),
        }
    }
}

impl From<Tick> for Wait {
    fn from(ticks: Tick) -> Self {
        if ticks == MAX_DELAY {
            Wait::Forever
        } else {
            Wait::Ticks(ticks)
        }
    }
}

/// Truncates the internal 64-bit tick counter to the public tick width.
pub(crate) fn truncate(ticks: u64) -> Tick {
    ticks as Tick
}

/// Generates one tick per tick period until the kernel shuts down.
///
/// Deadlines are computed from the start instant rather than from the end
/// of each sleep so the tick rate does not drift.
pub(crate) fn run_ticker(shared: Arc<Shared>) {
    let period = shared.config().tick_period();
    let mut next = Instant::now() + period;
    loop {
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        if !shared.tick() {
            break;
        }
        next += period;
    }
    log::debug!("ticker stopped");
}
