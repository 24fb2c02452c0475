//! # rtk
//!
//! A host model of the preemptive real-time kernel services that a software
//! timer layer is built on. Application threads talk to a single timer
//! daemon thread through a bounded command queue; the daemon owns every
//! timer object and runs expiry functions and deferred calls one at a time.
//!
//! ## Module Overview
//! - [`kernel`]    – Kernel handle, timer daemon and its command queue.
//! - [`timer`]     – Kernel timer objects addressed through [`TimerHandle`].
//! - [`tick`]      – Tick arithmetic, wait policies and the ticker thread.
//! - [`config`]    – [`KernelConfig`] and its builder.
//! - [`context`]   – Opaque user context passed back to callbacks.
//! - [`interrupt`] – Per-thread interrupt and masking context.
//! - [`thread`]    – Application identity and thread priorities.
//! - [`check`]     – Fatal error reporting.
//!
//! Time only moves when [`Kernel::tick`] is called, either by the ticker
//! thread ([`TickSource::Periodic`]) or by the embedding code
//! ([`TickSource::Manual`]), which keeps tests deterministic.

pub mod check;
pub mod config;
pub mod context;
pub mod interrupt;
pub mod kernel;
pub mod thread;
pub mod tick;
pub mod timer;

pub use config::{KernelConfig, KernelConfigBuilder, TickSource};
pub use context::Context;
pub use kernel::{DaemonHandle, Kernel, KernelError, PendedFunction};
pub use thread::Priority;
pub use tick::{Tick, Wait, MAX_DELAY};
pub use timer::{TimerFunction, TimerHandle, TimerKey};

#[cfg(test)]
mod tests;
