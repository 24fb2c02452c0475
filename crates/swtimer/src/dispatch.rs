//! The trampoline every swtimer expiry goes through.

use std::sync::Arc;

use parking_lot::RwLock;
use rtk::{TimerFunction, TimerHandle};

use crate::slot::SlotRef;

/// Unpacks callback slots on the daemon thread and tracks which timer is
/// currently executing.
#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    executing: RwLock<Option<Arc<str>>>,
}

impl Dispatcher {
    pub(crate) fn trampoline(self: &Arc<Self>) -> TimerFunction {
        let dispatcher = Arc::clone(self);
        Arc::new(move |timer: &TimerHandle| dispatcher.dispatch(timer))
    }

    /// Name of the timer whose callback is running, if any.
    pub(crate) fn current_name(&self) -> Option<Arc<str>> {
        self.executing.read().clone()
    }

    fn dispatch(&self, timer: &TimerHandle) {
        let id = timer.timer_id();
        let Some(slot) = id.downcast_ref::<SlotRef>() else {
            // The slot is detached only after the timer is stopped and idle.
            log::warn!("timer {:?} fired without a callback slot", timer.key());
            return;
        };
        let _scope = ExecutingScope::enter(self, timer.name());
        slot.slot().invoke();
    }
}

struct ExecutingScope<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> ExecutingScope<'a> {
    fn enter(dispatcher: &'a Dispatcher, name: Arc<str>) -> Self {
        *dispatcher.executing.write() = Some(name);
        Self { dispatcher }
    }
}

impl Drop for ExecutingScope<'_> {
    fn drop(&mut self) {
        *self.dispatcher.executing.write() = None;
    }
}
