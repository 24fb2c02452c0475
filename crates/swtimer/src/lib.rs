//! # swtimer
//!
//! Application-level software timers on top of the [`rtk`] timer daemon.
//!
//! A [`Timer`] pairs a kernel timer with a callback slot holding a plain
//! function and its context. Every expiry runs on the daemon thread through
//! one trampoline that unpacks the slot. Freeing a timer disarms it, waits
//! until no callback for it is in flight and only then releases the slot.
//!
//! ```no_run
//! use rtk::{Kernel, KernelConfig};
//! use swtimer::{Context, TimerService, TimerType};
//!
//! fn blink(_ctx: &Context) {}
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! kernel.start().unwrap();
//! let timers = TimerService::new(kernel);
//!
//! let timer = timers.alloc(blink, TimerType::Periodic, Context::empty());
//! timer.start(500).unwrap();
//! timer.free();
//! ```
//!
//! ## Context rules
//! Everything except [`TimerService::pending_callback`] is thread-context
//! only; calling it from an interrupt handler is a fatal error.

mod dispatch;
pub mod error;
pub mod service;
pub mod slot;
pub mod timer;

pub use error::TimerError;
pub use service::{TimerService, TimerThreadPriority};
pub use slot::{CallbackSlot, TimerCallback};
pub use timer::{Timer, TimerType};

pub use rtk::{Context, PendedFunction, Tick, MAX_DELAY};

#[cfg(test)]
mod tests;
