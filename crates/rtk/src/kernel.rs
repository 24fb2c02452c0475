//! Kernel handle and the timer daemon (the "timer service task").
//!
//! All timer state lives behind one lock owned by [`Shared`]. Application
//! threads never mutate a timer directly: they queue a [`Command`] and the
//! daemon applies it, so every change is serialised with expiries and
//! deferred calls. User code (expiry functions, deferred calls, the idle
//! hook and drops of user contexts) always runs with the lock released.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::config::{KernelConfig, TickSource};
use crate::context::Context;
use crate::thread::Priority;
use crate::tick::{self, Tick, Wait};
use crate::timer::{TimerFunction, TimerHandle, TimerKey, TimerMeta};

/// Function executed on the daemon thread by a deferred call.
pub type PendedFunction = fn(&Context, u32);

/// Errors reported by kernel services.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[error("timer daemon is not running")]
    NotRunning,
    #[error("timer daemon already started")]
    AlreadyRunning,
    #[error("timer command queue is full")]
    QueueFull,
    #[error("timer {0:?} does not exist")]
    NoSuchTimer(TimerKey),
    #[error("timer limit of {0} reached")]
    TimerLimit(usize),
    #[error("priority {priority} outside 0..{max}")]
    InvalidPriority { priority: u8, max: u8 },
    #[error("failed to spawn the {0} thread")]
    Spawn(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerOp {
    ChangePeriod(Tick),
    Reset,
    Stop,
    Delete,
}

pub(crate) enum Command {
    Timer { key: TimerKey, op: TimerOp },
    Pend {
        function: PendedFunction,
        context: Context,
        arg: u32,
    },
    Barrier,
}

impl Command {
    fn timer(&self) -> Option<TimerKey> {
        match self {
            Self::Timer { key, .. } => Some(*key),
            _ => None,
        }
    }
}

struct TimerEntry {
    meta: Arc<TimerMeta>,
    period: u64,
    expiry: u64,
    /// Arming order; breaks ties between timers due on the same tick.
    order: u64,
    active: bool,
    in_flight: bool,
}

struct DaemonInfo {
    thread: ThreadId,
    priority: Priority,
}

#[derive(Default)]
struct State {
    now: u64,
    timers: BTreeMap<TimerKey, TimerEntry>,
    next_key: u64,
    next_order: u64,
    queue: VecDeque<(u64, Command)>,
    enqueued: u64,
    completed: u64,
    daemon: Option<DaemonInfo>,
    running: bool,
    shutdown: bool,
    busy: bool,
}

impl State {
    fn is_due(&self, key: TimerKey) -> bool {
        self.timers
            .get(&key)
            .map_or(false, |t| t.active && !t.in_flight && t.expiry <= self.now)
    }

    /// Timers due right now, earliest expiry first, ties in arming order.
    fn due_timers(&self) -> Vec<TimerKey> {
        let mut due: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, t)| t.active && !t.in_flight && t.expiry <= self.now)
            .map(|(key, t)| (t.expiry, t.order, *key))
            .collect();
        due.sort_unstable();
        due.into_iter().map(|(_, _, key)| key).collect()
    }

    fn has_work(&self) -> bool {
        !self.queue.is_empty()
            || self
                .timers
                .values()
                .any(|t| t.active && !t.in_flight && t.expiry <= self.now)
    }

    fn is_idle(&self) -> bool {
        !self.busy && !self.has_work()
    }

    fn is_daemon(&self) -> bool {
        let current = thread::current().id();
        self.daemon.as_ref().map_or(false, |d| d.thread == current)
    }

    fn bump_order(&mut self) -> u64 {
        self.next_order += 1;
        self.next_order
    }

    /// Applies a timer command. A deleted entry is handed back so the caller
    /// can drop it with the lock released.
    fn apply(&mut self, key: TimerKey, op: TimerOp) -> Option<TimerEntry> {
        let now = self.now;
        let order = self.bump_order();
        if let TimerOp::Delete = op {
            return self.timers.remove(&key);
        }
        let Some(timer) = self.timers.get_mut(&key) else {
            log::trace!("dropping {op:?} for deleted timer {key:?}");
            return None;
        };
        match op {
            TimerOp::ChangePeriod(period) => {
                timer.period = u64::from(period.max(1));
                // An armed timer keeps its pending countdown.
                if !timer.active {
                    timer.expiry = now + timer.period;
                    timer.order = order;
                    timer.active = true;
                }
            }
            TimerOp::Reset => {
                timer.expiry = now + timer.period;
                timer.order = order;
                timer.active = true;
            }
            TimerOp::Stop => timer.active = false,
            TimerOp::Delete => {}
        }
        None
    }
}

pub(crate) struct Shared {
    config: KernelConfig,
    state: Mutex<State>,
    /// Wakes the daemon: new tick, new command or shutdown.
    wake: Condvar,
    /// Broadcast on every daemon state change callers may wait for.
    changed: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    extensions: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Shared {
    pub(crate) fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Advances time by one tick. Returns false once the kernel is shut down.
    pub(crate) fn tick(&self) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        state.now += 1;
        drop(state);
        self.wake.notify_one();
        self.changed.notify_all();
        true
    }

    /// Puts a command in the queue, waiting for room according to `wait`.
    ///
    /// On failure the command is handed back so user data inside it can be
    /// dropped after the lock is released.
    fn enqueue(
        &self,
        state: &mut MutexGuard<'_, State>,
        command: Command,
        wait: Wait,
    ) -> Result<u64, (KernelError, Command)> {
        if let Some(key) = command.timer() {
            if !state.timers.contains_key(&key) {
                return Err((KernelError::NoSuchTimer(key), command));
            }
        }
        let since = state.now;
        let capacity = self.config.timer_queue_len.max(1);
        loop {
            if !state.running {
                return Err((KernelError::NotRunning, command));
            }
            if state.queue.len() < capacity {
                break;
            }
            if wait.expired(since, state.now) {
                return Err((KernelError::QueueFull, command));
            }
            self.changed.wait(state);
        }
        state.enqueued += 1;
        let seq = state.enqueued;
        state.queue.push_back((seq, command));
        self.wake.notify_one();
        Ok(seq)
    }

    /// Queues a command and blocks until the daemon has processed it.
    ///
    /// On the daemon thread itself the command is only queued: the daemon
    /// cannot wait for itself. With no daemon running, `Stop` and `Delete`
    /// are applied on the spot.
    pub(crate) fn send(&self, command: Command, wait: Wait) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if let Command::Timer {
            key,
            op: op @ (TimerOp::Stop | TimerOp::Delete),
        } = command
        {
            if !state.running {
                if !state.timers.contains_key(&key) {
                    return Err(KernelError::NoSuchTimer(key));
                }
                log::trace!("timer {key:?}: {op:?} with no daemon running");
                let deleted = state.apply(key, op);
                drop(state);
                drop(deleted);
                return Ok(());
            }
        }
        let on_daemon = state.is_daemon();
        let wait = if on_daemon { Wait::NONE } else { wait };
        let seq = self
            .enqueue(&mut state, command, wait)
            .map_err(|(err, _)| err)?;
        if on_daemon {
            return Ok(());
        }
        while state.completed < seq {
            if !state.running {
                return Err(KernelError::NotRunning);
            }
            self.changed.wait(&mut state);
        }
        Ok(())
    }

    /// Queues a command without waiting for the daemon to process it.
    fn post(&self, command: Command, wait: Wait) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let wait = if state.is_daemon() { Wait::NONE } else { wait };
        let result = self.enqueue(&mut state, command, wait);
        drop(state);
        result.map(|_| ()).map_err(|(err, _rejected)| err)
    }

    pub(crate) fn timer_active(&self, key: TimerKey) -> bool {
        let state = self.state.lock();
        state
            .timers
            .get(&key)
            .map_or(false, |t| t.active || t.in_flight)
    }

    pub(crate) fn timer_expiry(&self, key: TimerKey) -> Option<u64> {
        self.state.lock().timers.get(&key).map(|t| t.expiry)
    }

    pub(crate) fn timer_period(&self, key: TimerKey) -> Option<u64> {
        self.state.lock().timers.get(&key).map(|t| t.period)
    }

    /// Blocks until the timer is neither armed nor running its function.
    ///
    /// Once the kernel has stopped an armed timer can no longer fire, so only
    /// an invocation already in flight is waited for.
    pub(crate) fn wait_inactive(&self, key: TimerKey) {
        let mut state = self.state.lock();
        loop {
            let (active, in_flight) = state
                .timers
                .get(&key)
                .map_or((false, false), |t| (t.active, t.in_flight));
            if !in_flight && (!active || !state.running) {
                return;
            }
            self.changed.wait(&mut state);
        }
    }
}

/// Handle to a kernel instance. Cheap to clone.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) shared: Arc<Shared>,
}

impl Kernel {
    /// Creates a kernel. Nothing runs until [`Kernel::start`].
    pub fn new(config: KernelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
                changed: Condvar::new(),
                threads: Mutex::new(Vec::new()),
                extensions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the kernel configuration.
    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    /// Returns this kernel's instance of `T`, creating it on first use.
    ///
    /// Layers built on the kernel keep their per-kernel state here.
    pub fn extension<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync + Default,
    {
        let mut extensions = self.shared.extensions.lock();
        let entry = extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(T::default()) as Arc<dyn Any + Send + Sync>);
        match Arc::clone(entry).downcast::<T>() {
            Ok(extension) => extension,
            Err(_) => crate::crash!("kernel extension stored under the wrong type"),
        }
    }

    /// Starts the timer daemon, and the ticker for [`TickSource::Periodic`].
    pub fn start(&self) -> Result<(), KernelError> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        if state.running {
            return Err(KernelError::AlreadyRunning);
        }
        if state.shutdown {
            return Err(KernelError::NotRunning);
        }

        // The daemon blocks on the state lock until it is fully registered.
        let shared = Arc::clone(&self.shared);
        let daemon = thread::Builder::new()
            .name(config.timer_task_name.to_owned())
            .spawn(move || run_daemon(shared))
            .map_err(|_| KernelError::Spawn("timer daemon"))?;
        state.daemon = Some(DaemonInfo {
            thread: daemon.thread().id(),
            priority: Priority(config.timer_task_priority),
        });
        state.running = true;
        drop(state);
        self.shared.threads.lock().push(daemon);

        if config.tick_source == TickSource::Periodic {
            let shared = Arc::clone(&self.shared);
            let ticker = thread::Builder::new()
                .name(format!("{}-tick", config.name))
                .spawn(move || tick::run_ticker(shared))
                .map_err(|_| KernelError::Spawn("ticker"))?;
            self.shared.threads.lock().push(ticker);
        }

        log::debug!(
            "kernel {} started: {} Hz, {:?} ticks, queue of {}",
            config.name,
            config.tick_hz,
            config.tick_source,
            config.timer_queue_len
        );
        Ok(())
    }

    /// Stops the daemon and the ticker, dropping queued commands.
    ///
    /// Callers blocked on a command are released with
    /// [`KernelError::NotRunning`]. A stopped kernel cannot be restarted.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.running = false;
            state.daemon = None;
            std::mem::take(&mut state.queue)
        };
        self.shared.wake.notify_all();
        self.shared.changed.notify_all();
        drop(pending);

        let current = thread::current().id();
        let threads = std::mem::take(&mut *self.shared.threads.lock());
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::warn!("kernel thread panicked before shutdown");
            }
        }
        log::debug!("kernel {} shut down", self.shared.config.name);
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Advances time by one tick. Safe from any context.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Advances time tick by tick, letting the daemon settle after each one.
    pub fn advance_ticks(&self, ticks: Tick) {
        for _ in 0..ticks {
            self.tick();
            self.wait_idle();
        }
    }

    /// Blocks until the daemon has nothing queued, nothing due and nothing
    /// running. Returns immediately on the daemon thread.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        if state.is_daemon() {
            return;
        }
        while state.running && !state.is_idle() {
            self.shared.changed.wait(&mut state);
        }
    }

    /// Current kernel time.
    pub fn ticks(&self) -> Tick {
        tick::truncate(self.shared.state.lock().now)
    }

    /// Converts milliseconds to ticks, rounding up.
    pub fn ms_to_ticks(&self, ms: u32) -> Tick {
        let hz = u64::from(self.shared.config.tick_hz.max(1));
        let ticks = (u64::from(ms) * hz + 999) / 1000;
        Tick::try_from(ticks).unwrap_or(Tick::MAX)
    }

    /// Creates a disarmed timer object. Does not involve the daemon.
    pub fn create_timer(
        &self,
        name: impl Into<Arc<str>>,
        period: Tick,
        auto_reload: bool,
        id: Context,
        function: TimerFunction,
    ) -> Result<TimerHandle, KernelError> {
        let max = self.shared.config.max_timers;
        let mut state = self.shared.state.lock();
        if state.timers.len() >= max {
            return Err(KernelError::TimerLimit(max));
        }
        let key = TimerKey(state.next_key);
        state.next_key += 1;

        let meta = Arc::new(TimerMeta::new(name.into(), auto_reload, id, function));
        state.timers.insert(
            key,
            TimerEntry {
                meta: Arc::clone(&meta),
                period: u64::from(period.max(1)),
                expiry: 0,
                order: 0,
                active: false,
                in_flight: false,
            },
        );
        drop(state);

        log::trace!("created timer {key:?} ({})", meta.name);
        Ok(TimerHandle::new(key, meta, self.clone()))
    }

    /// Defers `function(context, arg)` to the daemon from thread context,
    /// waiting for queue room according to `wait`.
    pub fn pend_function_call(
        &self,
        function: PendedFunction,
        context: Context,
        arg: u32,
        wait: Wait,
    ) -> Result<(), KernelError> {
        self.shared.post(
            Command::Pend {
                function,
                context,
                arg,
            },
            wait,
        )
    }

    /// Defers `function(context, arg)` to the daemon from interrupt context.
    /// Never blocks: fails with [`KernelError::QueueFull`] instead.
    pub fn pend_function_call_from_isr(
        &self,
        function: PendedFunction,
        context: Context,
        arg: u32,
    ) -> Result<(), KernelError> {
        let mut state = self.shared.state.lock();
        let result = self.shared.enqueue(
            &mut state,
            Command::Pend {
                function,
                context,
                arg,
            },
            Wait::NONE,
        );
        drop(state);
        result.map(|_| ()).map_err(|(err, _rejected)| err)
    }

    /// Waits until every command queued before this call has been processed.
    pub fn flush(&self) -> Result<(), KernelError> {
        self.shared.send(Command::Barrier, Wait::Forever)
    }

    /// Returns the daemon thread, if the kernel has been started.
    pub fn daemon(&self) -> Option<DaemonHandle> {
        let state = self.shared.state.lock();
        state.daemon.as_ref().map(|daemon| DaemonHandle {
            kernel: self.clone(),
            thread: daemon.thread,
        })
    }

    /// True when called from the timer daemon.
    pub fn is_daemon_thread(&self) -> bool {
        self.shared.state.lock().is_daemon()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Kernel")
            .field("name", &self.shared.config.name)
            .field("now", &state.now)
            .field("timers", &state.timers.len())
            .field("queued", &state.queue.len())
            .field("running", &state.running)
            .finish()
    }
}

/// Handle to the timer daemon thread.
#[derive(Clone)]
pub struct DaemonHandle {
    kernel: Kernel,
    thread: ThreadId,
}

impl DaemonHandle {
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Current daemon priority; `None` once the kernel has shut down.
    pub fn priority(&self) -> Option<Priority> {
        let state = self.kernel.shared.state.lock();
        state
            .daemon
            .as_ref()
            .filter(|daemon| daemon.thread == self.thread)
            .map(|daemon| daemon.priority)
    }

    /// Changes the daemon priority.
    pub fn set_priority(&self, priority: Priority) -> Result<(), KernelError> {
        let max = self.kernel.shared.config.max_priorities;
        if priority.0 >= max {
            return Err(KernelError::InvalidPriority {
                priority: priority.0,
                max,
            });
        }
        let mut state = self.kernel.shared.state.lock();
        let daemon = state
            .daemon
            .as_mut()
            .filter(|daemon| daemon.thread == self.thread)
            .ok_or(KernelError::NotRunning)?;
        let previous = std::mem::replace(&mut daemon.priority, priority);
        drop(state);
        log::debug!("timer daemon priority {} -> {}", previous.0, priority.0);
        Ok(())
    }
}

impl fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("thread", &self.thread)
            .finish()
    }
}

/// Each pass runs the timers due when the pass starts, then the commands
/// queued by then. A periodic timer that overruns its period is due again on
/// every pass but cannot keep queued commands from being served.
fn run_daemon(shared: Arc<Shared>) {
    log::debug!("{} running", shared.config.timer_task_name);
    let mut state = shared.state.lock();
    while !state.shutdown {
        let due = state.due_timers();
        let pending = state.queue.len();
        if due.is_empty() && pending == 0 {
            shared.changed.notify_all();
            if let Some(idle) = shared.config.idle_callback {
                MutexGuard::unlocked(&mut state, idle);
                if state.has_work() || state.shutdown {
                    continue;
                }
            }
            shared.wake.wait(&mut state);
            continue;
        }

        for key in due {
            if state.shutdown {
                break;
            }
            expire(&shared, &mut state, key);
        }
        for _ in 0..pending {
            if state.shutdown {
                break;
            }
            let Some((seq, command)) = state.queue.pop_front() else {
                break;
            };
            process(&shared, &mut state, seq, command);
        }
    }
    drop(state);
    log::debug!("{} stopped", shared.config.timer_task_name);
}

fn expire(shared: &Arc<Shared>, state: &mut MutexGuard<'_, State>, key: TimerKey) {
    if !state.is_due(key) {
        return;
    }
    let order = state.bump_order();
    let now = state.now;
    let Some(timer) = state.timers.get_mut(&key) else {
        return;
    };
    timer.in_flight = true;
    if timer.meta.auto_reload {
        timer.expiry += timer.period;
        timer.order = order;
    } else {
        timer.active = false;
    }
    let handle = TimerHandle::new(
        key,
        Arc::clone(&timer.meta),
        Kernel {
            shared: Arc::clone(shared),
        },
    );
    state.busy = true;
    log::trace!("timer {key:?} expired at tick {now}");

    MutexGuard::unlocked(state, move || handle.fire());

    if let Some(timer) = state.timers.get_mut(&key) {
        timer.in_flight = false;
    }
    state.busy = false;
    shared.changed.notify_all();
}

fn process(shared: &Arc<Shared>, state: &mut MutexGuard<'_, State>, seq: u64, command: Command) {
    state.busy = true;
    // A queue slot just opened up.
    shared.changed.notify_all();

    match command {
        Command::Timer { key, op } => {
            log::trace!("timer {key:?}: {op:?}");
            if let Some(deleted) = state.apply(key, op) {
                MutexGuard::unlocked(state, move || drop(deleted));
            }
        }
        Command::Pend {
            function,
            context,
            arg,
        } => {
            MutexGuard::unlocked(state, move || function(&context, arg));
        }
        Command::Barrier => {}
    }

    state.completed = seq;
    state.busy = false;
    shared.changed.notify_all();
}
