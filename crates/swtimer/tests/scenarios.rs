//! End-to-end timer scenarios against a manually ticked kernel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use rtk::{Kernel, KernelConfig};
use swtimer::{Context, TimerService, TimerType};

fn service() -> TimerService {
    let kernel = Kernel::new(
        KernelConfig::builder()
            .name("scenarios")
            .manual_ticks()
            .build(),
    );
    kernel.start().unwrap();
    TimerService::new(kernel)
}

static ONE_SHOT_FIRES: AtomicUsize = AtomicUsize::new(0);
static ONE_SHOT_CONTEXT: AtomicUsize = AtomicUsize::new(0);

fn one_shot(ctx: &Context) {
    ONE_SHOT_CONTEXT.store(*ctx.downcast_ref::<usize>().unwrap(), Ordering::SeqCst);
    ONE_SHOT_FIRES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn one_shot_fires_once_with_its_context() {
    let service = service();
    let timer = service.alloc(one_shot, TimerType::Once, Context::new(0x1usize));

    timer.start(10).unwrap();
    service.kernel().advance_ticks(9);
    assert_eq!(ONE_SHOT_FIRES.load(Ordering::SeqCst), 0);

    service.kernel().advance_ticks(1);
    assert_eq!(ONE_SHOT_FIRES.load(Ordering::SeqCst), 1);
    assert_eq!(ONE_SHOT_CONTEXT.load(Ordering::SeqCst), 0x1);
    assert!(!timer.is_running());

    service.kernel().advance_ticks(30);
    assert_eq!(ONE_SHOT_FIRES.load(Ordering::SeqCst), 1);

    timer.free();
    service.kernel().shutdown();
}

fn count(ctx: &Context) {
    ctx.downcast_ref::<AtomicUsize>()
        .unwrap()
        .fetch_add(1, Ordering::SeqCst);
}

#[test]
fn periodic_fires_every_period_until_stopped() {
    let service = service();
    let hits = Arc::new(AtomicUsize::new(0));
    let timer = service.alloc(
        count,
        TimerType::Periodic,
        Context::from_arc(Arc::clone(&hits)),
    );

    timer.start(5).unwrap();
    service.kernel().advance_ticks(15);
    timer.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    service.kernel().advance_ticks(50);
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    timer.free();
    service.kernel().shutdown();
}

#[derive(Default)]
struct Handshake {
    state: Mutex<Handoff>,
    cv: Condvar,
}

#[derive(Default)]
struct Handoff {
    entered: bool,
    released: bool,
    events: Vec<&'static str>,
}

fn slow_callback(ctx: &Context) {
    let shake = ctx.downcast_ref::<Handshake>().unwrap();
    let mut state = shake.state.lock().unwrap();
    state.entered = true;
    shake.cv.notify_all();
    while !state.released {
        state = shake.cv.wait(state).unwrap();
    }
    state.events.push("callback returned");
}

#[test]
fn free_waits_for_running_callback() {
    let service = service();
    let shake = Arc::new(Handshake::default());
    let timer = service.alloc(
        slow_callback,
        TimerType::Once,
        Context::from_arc(Arc::clone(&shake)),
    );
    timer.start(1).unwrap();
    service.kernel().tick();

    {
        let mut state = shake.state.lock().unwrap();
        while !state.entered {
            state = shake.cv.wait(state).unwrap();
        }
    }

    let freeing = {
        let shake = Arc::clone(&shake);
        thread::spawn(move || {
            timer.free();
            shake.state.lock().unwrap().events.push("freed");
        })
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!freeing.is_finished());

    shake.state.lock().unwrap().released = true;
    shake.cv.notify_all();
    freeing.join().unwrap();

    let state = shake.state.lock().unwrap();
    assert_eq!(state.events, ["callback returned", "freed"]);
    drop(state);
    assert_eq!(Arc::strong_count(&shake), 1);
    service.kernel().shutdown();
}

#[test]
fn timers_from_many_threads() {
    let service = service();
    let hits = Arc::new(AtomicUsize::new(0));

    let timers: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                let timer = service.alloc(count, TimerType::Once, Context::from_arc(hits));
                timer.start(i + 1).unwrap();
                timer
            })
        })
        .map(|handle| handle.join().unwrap())
        .collect();

    service.kernel().advance_ticks(4);
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    for timer in timers {
        timer.free();
    }
    service.kernel().shutdown();
}

fn overrun(ctx: &Context) {
    count(ctx);
    thread::sleep(Duration::from_millis(3));
}

#[test]
fn slow_periodic_timer_can_still_be_stopped() {
    let kernel = Kernel::new(KernelConfig::builder().name("overrun").tick_hz(1000).build());
    kernel.start().unwrap();
    let service = TimerService::new(kernel);
    let hits = Arc::new(AtomicUsize::new(0));
    let timer = service.alloc(
        overrun,
        TimerType::Periodic,
        Context::from_arc(Arc::clone(&hits)),
    );
    timer.start(1).unwrap();
    while hits.load(Ordering::SeqCst) < 2 {
        thread::sleep(Duration::from_millis(1));
    }

    let (done, finished) = mpsc::channel();
    let stopper = thread::spawn(move || {
        timer.stop();
        done.send(()).unwrap();
        timer
    });
    assert!(finished.recv_timeout(Duration::from_secs(3)).is_ok());

    let timer = stopper.join().unwrap();
    assert!(!timer.is_running());
    timer.free();
    service.kernel().shutdown();
}
