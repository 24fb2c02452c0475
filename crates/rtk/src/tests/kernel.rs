use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{manual_kernel, Gate};
use crate::config::KernelConfig;
use crate::context::Context;
use crate::kernel::{Kernel, KernelError};
use crate::thread::Priority;
use crate::tick::Wait;

fn record(ctx: &Context, arg: u32) {
    ctx.downcast_ref::<Mutex<Vec<u32>>>()
        .unwrap()
        .lock()
        .unwrap()
        .push(arg);
}

fn hold(ctx: &Context, _arg: u32) {
    ctx.downcast_ref::<Gate>().unwrap().pass();
}

#[test]
fn start_twice_is_rejected() {
    let kernel = manual_kernel(4);
    assert_eq!(kernel.start(), Err(KernelError::AlreadyRunning));
    kernel.shutdown();
}

#[test]
fn services_need_a_running_kernel() {
    let kernel = Kernel::new(KernelConfig::builder().manual_ticks().build());
    assert!(kernel.daemon().is_none());
    assert_eq!(
        kernel.pend_function_call(record, Context::empty(), 0, Wait::Forever),
        Err(KernelError::NotRunning)
    );

    kernel.start().unwrap();
    kernel.shutdown();
    assert!(!kernel.is_running());
    assert_eq!(kernel.flush(), Err(KernelError::NotRunning));
    assert_eq!(kernel.start(), Err(KernelError::NotRunning));
}

#[test]
fn pended_calls_run_in_order() {
    let kernel = manual_kernel(8);
    let log = Arc::new(Mutex::new(Vec::<u32>::new()));
    let ctx = Context::from_arc(Arc::clone(&log));

    for arg in 1..=3 {
        kernel
            .pend_function_call(record, ctx.clone(), arg, Wait::Forever)
            .unwrap();
    }
    {
        let _isr = crate::interrupt::enter_isr();
        kernel
            .pend_function_call_from_isr(record, ctx.clone(), 4)
            .unwrap();
    }
    kernel.flush().unwrap();

    assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 4]);
    kernel.shutdown();
}

#[test]
fn isr_submission_fails_on_full_queue() {
    let kernel = manual_kernel(2);
    let gate = Arc::new(Gate::default());
    kernel
        .pend_function_call(hold, Context::from_arc(Arc::clone(&gate)), 0, Wait::Forever)
        .unwrap();
    gate.wait_entered();

    let log = Arc::new(Mutex::new(Vec::<u32>::new()));
    let ctx = Context::from_arc(Arc::clone(&log));
    kernel.pend_function_call_from_isr(record, ctx.clone(), 1).unwrap();
    kernel.pend_function_call_from_isr(record, ctx.clone(), 2).unwrap();
    assert_eq!(
        kernel.pend_function_call_from_isr(record, ctx.clone(), 3),
        Err(KernelError::QueueFull)
    );
    assert_eq!(
        kernel.pend_function_call(record, ctx, 3, Wait::NONE),
        Err(KernelError::QueueFull)
    );

    gate.open();
    kernel.flush().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    kernel.shutdown();
}

#[test]
fn bounded_wait_gives_up_after_ticks() {
    let kernel = manual_kernel(1);
    let gate = Arc::new(Gate::default());
    kernel
        .pend_function_call(hold, Context::from_arc(Arc::clone(&gate)), 0, Wait::Forever)
        .unwrap();
    gate.wait_entered();
    kernel
        .pend_function_call(record, Context::empty(), 0, Wait::NONE)
        .unwrap();

    let sender = kernel.clone();
    let blocked = std::thread::spawn(move || {
        sender.pend_function_call(record, Context::empty(), 1, Wait::Ticks(2))
    });
    while !blocked.is_finished() {
        kernel.tick();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(blocked.join().unwrap(), Err(KernelError::QueueFull));

    gate.open();
    kernel.shutdown();
}

#[test]
fn daemon_priority_is_bounded() {
    let kernel = manual_kernel(4);
    let daemon = kernel.daemon().unwrap();
    assert_eq!(daemon.priority(), Some(Priority(2)));

    daemon.set_priority(Priority(31)).unwrap();
    assert_eq!(daemon.priority(), Some(Priority(31)));
    assert_eq!(
        daemon.set_priority(Priority(32)),
        Err(KernelError::InvalidPriority {
            priority: 32,
            max: 32
        })
    );

    kernel.shutdown();
    assert_eq!(daemon.priority(), None);
}

#[test]
fn daemon_identity() {
    let kernel = manual_kernel(4);
    assert!(!kernel.is_daemon_thread());

    fn report_daemon(ctx: &Context, _arg: u32) {
        let (kernel, seen) = ctx
            .downcast_ref::<(Kernel, Mutex<Option<bool>>)>()
            .unwrap();
        *seen.lock().unwrap() = Some(kernel.is_daemon_thread());
    }
    let shared = Arc::new((kernel.clone(), Mutex::new(None)));
    kernel
        .pend_function_call(report_daemon, Context::from_arc(Arc::clone(&shared)), 0, Wait::Forever)
        .unwrap();
    kernel.flush().unwrap();
    assert_eq!(*shared.1.lock().unwrap(), Some(true));
    kernel.shutdown();
}

#[test]
fn idle_hook_runs_when_daemon_drains() {
    static IDLE: AtomicUsize = AtomicUsize::new(0);
    fn idle() {
        IDLE.fetch_add(1, Ordering::SeqCst);
    }

    let kernel = Kernel::new(
        KernelConfig::builder()
            .manual_ticks()
            .idle_callback(idle)
            .build(),
    );
    kernel.start().unwrap();
    kernel.flush().unwrap();
    for _ in 0..1000 {
        if IDLE.load(Ordering::SeqCst) > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(IDLE.load(Ordering::SeqCst) > 0);
    kernel.shutdown();
}

#[test]
fn ms_to_ticks_rounds_up() {
    let fast = Kernel::new(KernelConfig::default());
    assert_eq!(fast.ms_to_ticks(5), 5);

    let slow = Kernel::new(KernelConfig::builder().tick_hz(100).build());
    assert_eq!(slow.ms_to_ticks(15), 2);
    assert_eq!(slow.ms_to_ticks(0), 0);
}

#[test]
fn periodic_source_advances_time() {
    let kernel = Kernel::new(KernelConfig::builder().tick_hz(1000).build());
    kernel.start().unwrap();
    for _ in 0..1000 {
        if kernel.ticks() >= 3 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(kernel.ticks() >= 3);
    kernel.shutdown();
}
