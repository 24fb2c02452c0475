//! Timer lifecycle: start, restart, stop, query and free.

use std::sync::Arc;
use std::thread;

use rtk::interrupt::is_irq_or_masked;
use rtk::{check, crash, Context, Tick, TimerHandle, Wait, MAX_DELAY};

use crate::error::TimerError;
use crate::slot::SlotRef;

/// Whether a timer fires once or keeps firing every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerType {
    Once,
    Periodic,
}

impl TimerType {
    pub(crate) fn auto_reload(self) -> bool {
        matches!(self, TimerType::Periodic)
    }
}

/// A software timer allocated from a [`TimerService`](crate::TimerService).
///
/// Dropping a `Timer` frees it exactly like [`Timer::free`].
#[derive(Debug)]
pub struct Timer {
    handle: TimerHandle,
    released: bool,
}

impl Timer {
    pub(crate) fn new(handle: TimerHandle) -> Self {
        Self {
            handle,
            released: false,
        }
    }

    /// Sets the period to `ticks` and arms the timer.
    ///
    /// An already armed timer keeps its pending countdown; use
    /// [`Timer::restart`] to restart it from the full period. Blocks until
    /// the daemon has applied the change.
    pub fn start(&self, ticks: Tick) -> Result<(), TimerError> {
        self.check_period(ticks);
        self.handle.change_period(ticks, Wait::Forever)?;
        Ok(())
    }

    /// Sets the period to `ticks` and restarts the countdown from it.
    pub fn restart(&self, ticks: Tick) -> Result<(), TimerError> {
        self.check_period(ticks);
        self.handle.change_period(ticks, Wait::Forever)?;
        self.handle.reset(Wait::Forever)?;
        Ok(())
    }

    /// Disarms the timer. A callback already running is not interrupted.
    pub fn stop(&self) {
        check_thread_context();
        if let Err(err) = self.handle.stop(Wait::Forever) {
            crash!("failed to stop timer: {err}");
        }
    }

    /// True while the timer is armed or its callback is running.
    pub fn is_running(&self) -> bool {
        check_thread_context();
        self.handle.is_active()
    }

    /// Tick at which the timer next fires.
    pub fn expire_time(&self) -> Tick {
        check_thread_context();
        self.handle.expiry_time()
    }

    /// Diagnostic name: the application that allocated the timer.
    pub fn name(&self) -> Arc<str> {
        self.handle.name()
    }

    pub fn mode(&self) -> TimerType {
        if self.handle.is_auto_reload() {
            TimerType::Periodic
        } else {
            TimerType::Once
        }
    }

    /// Stops the timer, waits for any running callback to return, releases
    /// the callback slot and deletes the kernel timer.
    pub fn free(mut self) {
        self.release();
        self.released = true;
    }

    fn check_period(&self, ticks: Tick) {
        check_thread_context();
        check!(ticks < MAX_DELAY, "timer period {ticks} is reserved");
    }

    fn release(&mut self) {
        check_thread_context();
        check!(
            !self.handle.kernel().is_daemon_thread(),
            "timer freed from the timer daemon"
        );

        if let Err(err) = self.handle.stop(Wait::Forever) {
            crash!("failed to stop timer: {err}");
        }
        // Only an inactive timer is guaranteed to have no callback in flight.
        self.handle.wait_inactive();

        let id = self.handle.replace_timer_id(Context::empty());
        match id.downcast::<SlotRef>().map(Arc::try_unwrap) {
            Ok(Ok(slot)) => {
                if slot.is_owned() {
                    log::trace!("released callback slot of {:?}", self.handle.key());
                }
                drop(slot);
            }
            Ok(Err(_)) => crash!("callback slot still referenced"),
            Err(_) => crash!("timer has no callback slot"),
        }

        if let Err(err) = self.handle.delete(Wait::Forever) {
            crash!("failed to delete timer: {err}");
        }
        log::debug!("freed timer {:?} ({})", self.handle.key(), self.handle.name());
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if thread::panicking() {
            log::warn!("leaking timer {:?} during unwind", self.handle.key());
            return;
        }
        self.release();
    }
}

pub(crate) fn check_thread_context() {
    check!(
        !is_irq_or_masked(),
        "timer service called from interrupt context"
    );
}
