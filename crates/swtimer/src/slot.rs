//! Callback slots: what the daemon needs to run a timer's callback.

use std::fmt;

use rtk::Context;

/// Function run on the timer daemon when a timer expires.
pub type TimerCallback = fn(&Context);

/// A callback together with the context it is called with.
pub struct CallbackSlot {
    func: TimerCallback,
    context: Context,
}

impl CallbackSlot {
    pub fn new(func: TimerCallback, context: Context) -> Self {
        Self { func, context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn invoke(&self) {
        (self.func)(&self.context)
    }
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("func", &(self.func as *const ()))
            .field("context", &self.context)
            .finish()
    }
}

/// Where a timer's slot lives. Only an owned slot is released by `free`.
#[derive(Debug)]
pub(crate) enum SlotRef {
    Owned(Box<CallbackSlot>),
    Borrowed(&'static CallbackSlot),
}

impl SlotRef {
    pub(crate) fn slot(&self) -> &CallbackSlot {
        match self {
            Self::Owned(slot) => slot,
            Self::Borrowed(slot) => slot,
        }
    }

    pub(crate) fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}
