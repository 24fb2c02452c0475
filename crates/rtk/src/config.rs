//! Kernel configuration.

use std::time::Duration;

/// Where kernel ticks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    /// Ticks only advance through [`Kernel::tick`](crate::Kernel::tick).
    Manual,
    /// A ticker thread advances time every tick period.
    Periodic,
}

/// Configuration for the kernel and its timer daemon.
///
/// Sizing follows the usual RTOS knobs: command queue length, the number of
/// timer objects that can exist at once, and the priority range of kernel
/// threads.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub tick_hz: u32,
    pub tick_source: TickSource,
    pub timer_queue_len: usize,
    pub max_timers: usize,
    pub max_priorities: u8,
    pub timer_task_priority: u8,
    pub timer_task_name: &'static str,
    pub idle_callback: Option<fn()>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "rtk",
            tick_hz: 1000,
            tick_source: TickSource::Periodic,
            timer_queue_len: 32,
            max_timers: 128,
            max_priorities: 32,
            timer_task_priority: 2,
            timer_task_name: "TimerDaemon",
            idle_callback: None,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Wall-clock length of one tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_hz.max(1)))
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the tick frequency in hertz.
    pub fn tick_hz(mut self, hz: u32) -> Self {
        self.config.tick_hz = hz;
        self
    }

    /// Selects how ticks are generated.
    pub fn tick_source(mut self, source: TickSource) -> Self {
        self.config.tick_source = source;
        self
    }

    /// Shorthand for [`TickSource::Manual`].
    pub fn manual_ticks(self) -> Self {
        self.tick_source(TickSource::Manual)
    }

    /// Sets the capacity of the daemon command queue.
    pub fn timer_queue_len(mut self, len: usize) -> Self {
        self.config.timer_queue_len = len;
        self
    }

    /// Sets how many timer objects may exist at once.
    pub fn max_timers(mut self, max: usize) -> Self {
        self.config.max_timers = max;
        self
    }

    /// Sets the number of thread priority levels.
    pub fn max_priorities(mut self, max: u8) -> Self {
        self.config.max_priorities = max;
        self
    }

    /// Sets the priority the timer daemon starts with.
    pub fn timer_task_priority(mut self, priority: u8) -> Self {
        self.config.timer_task_priority = priority;
        self
    }

    /// Sets the OS thread name of the timer daemon.
    pub fn timer_task_name(mut self, name: &'static str) -> Self {
        self.config.timer_task_name = name;
        self
    }

    /// Sets a hook the daemon calls whenever it runs out of work.
    pub fn idle_callback(mut self, callback: fn()) -> Self {
        self.config.idle_callback = Some(callback);
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
