//! Timer objects managed by the daemon.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::Context;
use crate::kernel::{Command, Kernel, KernelError, TimerOp};
use crate::tick::{self, Tick, Wait};

/// Identifies a timer within its kernel. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey(pub(crate) u64);

/// Function the daemon calls when a timer expires.
pub type TimerFunction = Arc<dyn Fn(&TimerHandle) + Send + Sync>;

pub(crate) struct TimerMeta {
    pub(crate) name: Arc<str>,
    pub(crate) auto_reload: bool,
    id: Mutex<Context>,
    function: TimerFunction,
}

impl TimerMeta {
    pub(crate) fn new(
        name: Arc<str>,
        auto_reload: bool,
        id: Context,
        function: TimerFunction,
    ) -> Self {
        Self {
            name,
            auto_reload,
            id: Mutex::new(id),
            function,
        }
    }
}

/// Handle to a kernel timer.
///
/// Commands (`change_period`, `reset`, `stop`, `delete`) go through the
/// daemon's queue and return once the daemon has processed them; issued from
/// the daemon itself they are only queued. Queries read the timer state
/// directly.
#[derive(Clone)]
pub struct TimerHandle {
    key: TimerKey,
    meta: Arc<TimerMeta>,
    kernel: Kernel,
}

impl TimerHandle {
    pub(crate) fn new(key: TimerKey, meta: Arc<TimerMeta>, kernel: Kernel) -> Self {
        Self { key, meta, kernel }
    }

    pub fn key(&self) -> TimerKey {
        self.key
    }

    pub fn name(&self) -> Arc<str> {
        Arc::clone(&self.meta.name)
    }

    pub fn is_auto_reload(&self) -> bool {
        self.meta.auto_reload
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Returns a clone of the timer's user id.
    pub fn timer_id(&self) -> Context {
        self.meta.id.lock().clone()
    }

    pub fn set_timer_id(&self, id: Context) {
        // The old id is dropped after the lock is released.
        let _previous = self.replace_timer_id(id);
    }

    /// Swaps the timer's user id, returning the previous one.
    pub fn replace_timer_id(&self, id: Context) -> Context {
        std::mem::replace(&mut *self.meta.id.lock(), id)
    }

    /// Sets the period. Arms a dormant timer at `now + period`; an armed
    /// timer keeps its pending expiry.
    pub fn change_period(&self, period: Tick, wait: Wait) -> Result<(), KernelError> {
        self.send(TimerOp::ChangePeriod(period), wait)
    }

    /// Re-arms the timer at `now + period`.
    pub fn reset(&self, wait: Wait) -> Result<(), KernelError> {
        self.send(TimerOp::Reset, wait)
    }

    pub fn stop(&self, wait: Wait) -> Result<(), KernelError> {
        self.send(TimerOp::Stop, wait)
    }

    /// Destroys the timer. The handle stays valid but every further command
    /// fails with [`KernelError::NoSuchTimer`].
    pub fn delete(&self, wait: Wait) -> Result<(), KernelError> {
        self.send(TimerOp::Delete, wait)
    }

    /// True while the timer is armed or its function is running.
    pub fn is_active(&self) -> bool {
        self.kernel.shared.timer_active(self.key)
    }

    /// Tick at which the timer next expires. Meaningful while active.
    pub fn expiry_time(&self) -> Tick {
        tick::truncate(self.kernel.shared.timer_expiry(self.key).unwrap_or(0))
    }

    pub fn period(&self) -> Tick {
        tick::truncate(self.kernel.shared.timer_period(self.key).unwrap_or(0))
    }

    /// Blocks until the timer is neither armed nor running its function.
    pub fn wait_inactive(&self) {
        self.kernel.shared.wait_inactive(self.key);
    }

    pub(crate) fn fire(&self) {
        (self.meta.function)(self)
    }

    fn send(&self, op: TimerOp, wait: Wait) -> Result<(), KernelError> {
        self.kernel
            .shared
            .send(Command::Timer { key: self.key, op }, wait)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("key", &self.key)
            .field("name", &self.meta.name)
            .field("auto_reload", &self.meta.auto_reload)
            .finish()
    }
}
