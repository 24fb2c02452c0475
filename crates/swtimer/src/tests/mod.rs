
use std::sync::atomic::{AtomicUsize, Ordering};

use rtk::{Context, Kernel, KernelConfig};

use crate::service::TimerService;

pub(super) fn manual_service() -> TimerService {
    let kernel = Kernel::new(
        KernelConfig::builder()
            .name("swtimer-test")
            .manual_ticks()
            .timer_queue_len(4)
            .max_timers(4)
            .build(),
    );
    kernel.start().unwrap();
    TimerService::new(kernel)
}

/// Counts invocations into the `AtomicUsize` carried by the context.
pub(super) fn count(ctx: &Context) {
    ctx.downcast_ref::<AtomicUsize>()
        .unwrap()
        .fetch_add(1, Ordering::SeqCst);
}

pub(super) fn noop(_ctx: &Context) {}
