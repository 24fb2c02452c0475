//! Fatal error reporting.
//!
//! Programming errors and operations that must not fail under correct use
//! end up in [`crash`]. The workspace builds with `panic = "abort"`, so a
//! crash halts the process; test builds unwind instead, which lets tests
//! observe the fatal path.

use core::fmt;
use core::panic::Location;

/// Reports a fatal error and never returns.
#[cold]
#[track_caller]
pub fn crash(args: fmt::Arguments<'_>) -> ! {
    let location = Location::caller();
    log::error!("fatal: {args} ({location})");
    panic!("{args}");
}

/// Crashes unless the condition holds.
///
/// ```should_panic
/// rtk::check!(1 + 1 == 3, "arithmetic is broken");
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::check!($cond, "check failed: {}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::check::crash(format_args!($($arg)+))
        }
    };
}

/// Crashes unconditionally with a formatted message.
#[macro_export]
macro_rules! crash {
    ($($arg:tt)+) => {
        $crate::check::crash(format_args!($($arg)+))
    };
}
