//! Timer allocation, deferred calls and daemon priority control.

use std::sync::Arc;

use rtk::interrupt::is_irq_or_masked;
use rtk::{
    check, crash, Context, Kernel, KernelError, PendedFunction, Priority, TimerFunction, Wait,
    MAX_DELAY,
};

use crate::dispatch::Dispatcher;
use crate::slot::{CallbackSlot, SlotRef, TimerCallback};
use crate::timer::{check_thread_context, Timer, TimerType};

/// Priority levels for the timer daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerThreadPriority {
    /// The kernel's configured timer task priority.
    Normal,
    /// One below the highest application priority.
    Elevated,
}

impl TryFrom<u8> for TimerThreadPriority {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Elevated),
            other => Err(other),
        }
    }
}

/// Entry point of the timer service for one kernel.
#[derive(Clone)]
pub struct TimerService {
    kernel: Kernel,
    dispatcher: Arc<Dispatcher>,
    trampoline: TimerFunction,
}

impl TimerService {
    /// Creates a service handle. Services on the same kernel share one
    /// dispatcher, so [`TimerService::current_name`] agrees across them.
    pub fn new(kernel: Kernel) -> Self {
        let dispatcher = kernel.extension::<Dispatcher>();
        let trampoline = dispatcher.trampoline();
        Self {
            kernel,
            dispatcher,
            trampoline,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Allocates a disarmed timer that calls `func(&context)` on expiry.
    ///
    /// The timer is named after the calling thread's application. Running out
    /// of kernel timers is fatal.
    pub fn alloc(&self, func: TimerCallback, kind: TimerType, context: Context) -> Timer {
        let slot = Box::new(CallbackSlot::new(func, context));
        self.create(SlotRef::Owned(slot), kind)
    }

    /// Allocates a timer around a caller-owned slot. Freeing the timer leaves
    /// the slot alone.
    pub fn alloc_with_slot(&self, slot: &'static CallbackSlot, kind: TimerType) -> Timer {
        self.create(SlotRef::Borrowed(slot), kind)
    }

    fn create(&self, slot: SlotRef, kind: TimerType) -> Timer {
        check_thread_context();
        let name = rtk::thread::appid();
        let handle = self
            .kernel
            .create_timer(
                name,
                MAX_DELAY,
                kind.auto_reload(),
                Context::new(slot),
                Arc::clone(&self.trampoline),
            )
            .unwrap_or_else(|err| crash!("failed to create timer: {err}"));
        log::debug!("allocated {kind:?} timer {:?} for {}", handle.key(), handle.name());
        Timer::new(handle)
    }

    /// Runs `func(&context, arg)` once on the timer daemon.
    ///
    /// From interrupt context the call is queued without blocking; from a
    /// thread it waits for queue room. Failing to queue is fatal.
    pub fn pending_callback(&self, func: PendedFunction, context: Context, arg: u32) {
        let result = if is_irq_or_masked() {
            self.kernel.pend_function_call_from_isr(func, context, arg)
        } else {
            self.kernel
                .pend_function_call(func, context, arg, Wait::Forever)
        };
        check!(result.is_ok(), "pending callback rejected: {result:?}");
    }

    /// Moves the timer daemon to the given priority level.
    pub fn set_thread_priority(&self, level: TimerThreadPriority) {
        check_thread_context();
        let Some(daemon) = self.kernel.daemon() else {
            crash!("timer daemon not started");
        };
        let config = self.kernel.config();
        let priority = match level {
            TimerThreadPriority::Normal => config.timer_task_priority,
            TimerThreadPriority::Elevated => config.max_priorities.saturating_sub(1),
        };
        if let Err(err) = daemon.set_priority(Priority(priority)) {
            crash!("failed to set timer daemon priority: {err}");
        }
    }

    /// Name of the timer whose callback is running right now, if any.
    pub fn current_name(&self) -> Option<Arc<str>> {
        self.dispatcher.current_name()
    }

    /// Waits until every timer command and deferred call queued so far has
    /// been processed.
    pub fn flush(&self) -> Result<(), KernelError> {
        check_thread_context();
        check!(
            !self.kernel.is_daemon_thread(),
            "timer service flushed from the timer daemon"
        );
        self.kernel.flush()
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("kernel", &self.kernel)
            .field("executing", &self.dispatcher.current_name())
            .finish()
    }
}
