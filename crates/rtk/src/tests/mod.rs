mod kernel;

use crate::config::KernelConfig;
use crate::kernel::Kernel;

/// Started kernel whose time only moves when the test ticks it.
pub(super) fn manual_kernel(queue_len: usize) -> Kernel {
    let kernel = Kernel::new(
        KernelConfig::builder()
            .name("test")
            .manual_ticks()
            .timer_queue_len(queue_len)
            .max_timers(8)
            .build(),
    );
    kernel.start().unwrap();
    kernel
}

/// Lets a test hold the daemon inside a callback until it is opened.
#[derive(Default)]
pub(super) struct Gate {
    state: std::sync::Mutex<(bool, bool)>,
    cv: std::sync::Condvar,
}

impl Gate {
    /// Called from the callback: reports entry, then blocks until opened.
    pub(super) fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.0 = true;
        self.cv.notify_all();
        while !state.1 {
            state = self.cv.wait(state).unwrap();
        }
    }

    pub(super) fn wait_entered(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.0 {
            state = self.cv.wait(state).unwrap();
        }
    }

    pub(super) fn open(&self) {
        self.state.lock().unwrap().1 = true;
        self.cv.notify_all();
    }
}
