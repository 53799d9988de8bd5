//! Tick-based timer service.
//!
//! A [`Timer`] owns one tick thread that advances a monotonic counter
//! every `tick_ms` milliseconds and fires every armed node whose tick
//! has been reached. A node either posts a message into an
//! [`EventDispatcher`] or calls a [`TimerListener`] directly on the
//! tick thread. Resolution is the caller-chosen tick; this is not a
//! high-resolution timer.

use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::message::{Message, ReceiverId, INVALID_KIND};

use log::{debug, trace, warn};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Implemented by anything that wants direct timeout callbacks.
///
/// Callbacks run on the tick thread with the timer's lock released.
/// They may arm and remove nodes on the same timer, but must not block
/// on anything that itself waits for the timer.
pub trait TimerListener: Send + Sync {
    /// Called when the armed timeout expires. `cookie` is the value
    /// given at arming time, returned unchanged.
    fn on_timeout(&self, cookie: u32);
}

/// One scheduled unit: a message bound for a dispatcher, or a direct
/// callback. Exactly one of `message`/`listener` is set.
struct TimerNode {
    message: Option<Arc<Message>>,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    listener: Option<Weak<dyn TimerListener>>,
    cookie: u32,

    /// Tick on which the node fires, compared modularly.
    fire_tick: u32,

    /// Repeat period in milliseconds, 0 for one-shot.
    period_ms: u32,

    /// Accumulated sub-tick remainder of the period, for drift
    /// correction on re-arm.
    carry_ms: u32,
}

/// Node list and tick counter, guarded by one mutex.
struct TickState {
    nodes: Vec<TimerNode>,
    ticks: u32,
    running: bool,
    stop_requested: bool,
}

struct Shared {
    state: Mutex<TickState>,
    wakeup: Condvar,
    tick_ms: u32,
}

/// A tick-thread timer that fires one-shot and periodic nodes.
///
/// The tick thread starts immediately on construction. A stoppable
/// timer can be halted with [`stop`](Timer::stop), which discards all
/// pending nodes without firing, and relaunched with
/// [`start`](Timer::start), which resets the tick counter. Dropping
/// the timer always stops the thread.
pub struct Timer {
    shared: Arc<Shared>,
    stoppable: bool,
    joiner: Mutex<Option<JoinHandle<()>>>,
}

impl Timer {
    /// Creates a timer with the given resolution and starts its tick
    /// thread. Fails only if the thread cannot be spawned.
    pub fn new(tick_ms: u32, stoppable: bool) -> Result<Timer> {
        let timer = Timer {
            shared: Arc::new(Shared {
                state: Mutex::new(TickState {
                    nodes: Vec::new(),
                    ticks: 0,
                    running: false,
                    stop_requested: false,
                }),
                wakeup: Condvar::new(),
                tick_ms: tick_ms.max(1),
            }),
            stoppable,
            joiner: Mutex::new(None),
        };
        timer.start()?;
        Ok(timer)
    }

    /// Returns the resolution in milliseconds per tick.
    pub fn tick_time_ms(&self) -> u32 {
        self.shared.tick_ms
    }

    /// Starts a stopped tick thread with the tick counter reset.
    /// Does nothing if the timer is already running.
    pub fn start(&self) -> Result<()> {
        let mut joiner = self.joiner.lock().unwrap();
        if joiner.is_some() {
            return Ok(());
        }

        {
            let mut state = self.shared.state.lock().unwrap();
            state.ticks = 0;
            state.stop_requested = false;
            state.running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("timer".to_owned())
            .spawn(move || tick_main(shared));
        match spawned {
            Ok(handle) => {
                *joiner = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.state.lock().unwrap().running = false;
                Err(err.into())
            }
        }
    }

    /// Stops a running tick thread, discarding every pending node
    /// without firing. Does nothing if the timer is not stoppable.
    ///
    /// Must not be called from a timer callback.
    pub fn stop(&self) {
        if !self.stoppable {
            return;
        }
        self.halt();
    }

    /// One-shot: posts `message` to `dispatcher` after `delay_ms`.
    ///
    /// The node holds one reference to the message until it fires or
    /// is removed.
    pub fn send_timed_event(
        &self,
        message: Arc<Message>,
        dispatcher: Arc<dyn EventDispatcher>,
        delay_ms: u32,
    ) -> Result<()> {
        self.arm(
            TimerNode {
                message: Some(message),
                dispatcher: Some(dispatcher),
                listener: None,
                cookie: 0,
                fire_tick: 0,
                period_ms: 0,
                carry_ms: 0,
            },
            delay_ms,
        )
    }

    /// Periodic: posts `message` to `dispatcher` every `period_ms`,
    /// correcting drift when the period is not a whole number of
    /// ticks.
    pub fn send_periodic_event(
        &self,
        message: Arc<Message>,
        dispatcher: Arc<dyn EventDispatcher>,
        period_ms: u32,
    ) -> Result<()> {
        self.arm(
            TimerNode {
                message: Some(message),
                dispatcher: Some(dispatcher),
                listener: None,
                cookie: 0,
                fire_tick: 0,
                period_ms,
                carry_ms: 0,
            },
            period_ms,
        )
    }

    /// One-shot: calls `listener.on_timeout(cookie)` on the tick
    /// thread after `delay_ms`.
    ///
    /// The timer holds only a weak reference; a node whose listener is
    /// gone at fire time is dropped silently.
    pub fn add_timer(
        &self,
        listener: &Arc<dyn TimerListener>,
        delay_ms: u32,
        cookie: u32,
    ) -> Result<()> {
        self.arm(
            TimerNode {
                message: None,
                dispatcher: None,
                listener: Some(Arc::downgrade(listener)),
                cookie,
                fire_tick: 0,
                period_ms: 0,
                carry_ms: 0,
            },
            delay_ms,
        )
    }

    /// Periodic variant of [`add_timer`](Timer::add_timer).
    pub fn add_periodic_timer(
        &self,
        listener: &Arc<dyn TimerListener>,
        period_ms: u32,
        cookie: u32,
    ) -> Result<()> {
        self.arm(
            TimerNode {
                message: None,
                dispatcher: None,
                listener: Some(Arc::downgrade(listener)),
                cookie,
                fire_tick: 0,
                period_ms,
                carry_ms: 0,
            },
            period_ms,
        )
    }

    /// Removes every message node armed for `dispatcher` whose kind is
    /// `kind`; [`INVALID_KIND`] matches any kind. No match is silent
    /// success.
    pub fn remove_timed_event(&self, kind: u32, dispatcher: &Arc<dyn EventDispatcher>) {
        let mut state = self.shared.state.lock().unwrap();
        state.nodes.retain(|n| {
            let hit = n
                .dispatcher
                .as_ref()
                .is_some_and(|d| dispatcher_eq(d, dispatcher))
                && n.message
                    .as_ref()
                    .is_some_and(|m| kind == INVALID_KIND || m.kind() == kind);
            !hit
        });
    }

    /// Removes every node holding exactly `message`, whatever its
    /// dispatcher.
    pub fn remove_timed_message(&self, message: &Arc<Message>) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .nodes
            .retain(|n| !n.message.as_ref().is_some_and(|m| Arc::ptr_eq(m, message)));
    }

    /// Removes every message node directed at `receiver`, optionally
    /// restricted to one dispatcher.
    pub fn remove_by_receiver(
        &self,
        receiver: ReceiverId,
        dispatcher: Option<&Arc<dyn EventDispatcher>>,
    ) {
        let mut state = self.shared.state.lock().unwrap();
        state.nodes.retain(|n| {
            let hit = n
                .message
                .as_ref()
                .is_some_and(|m| m.target() == Some(receiver))
                && dispatcher.is_none_or(|d| {
                    n.dispatcher.as_ref().is_some_and(|nd| dispatcher_eq(nd, d))
                });
            !hit
        });
    }

    fn arm(&self, mut node: TimerNode, delay_ms: u32) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.running {
            return Err(Error::AlreadyShutDown);
        }

        node.fire_tick = state
            .ticks
            .wrapping_add(ticks_for(delay_ms, self.shared.tick_ms));
        trace!(
            "armed node for tick {} (now {}, period {} ms)",
            node.fire_tick,
            state.ticks,
            node.period_ms
        );
        state.nodes.push(node);
        Ok(())
    }

    /// Holds the joiner lock for the whole sequence so a concurrent
    /// `start` cannot slip in between the handle takeover and the stop
    /// request.
    fn halt(&self) {
        let mut joiner = self.joiner.lock().unwrap();
        let Some(handle) = joiner.take() else {
            return;
        };

        self.shared.state.lock().unwrap().stop_requested = true;
        self.shared.wakeup.notify_all();
        if handle.join().is_err() {
            warn!("timer tick thread terminated by panic");
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.halt();
    }
}

/// A due node detached from the list, fired with the lock released.
enum Firing {
    Post {
        message: Arc<Message>,
        dispatcher: Arc<dyn EventDispatcher>,
    },
    Callback {
        listener: Weak<dyn TimerListener>,
        cookie: u32,
    },
}

/// The tick thread main loop.
fn tick_main(shared: Arc<Shared>) {
    debug!("timer started, {} ms per tick", shared.tick_ms);

    let tick = Duration::from_millis(u64::from(shared.tick_ms));
    let mut deadline = Instant::now() + tick;

    let mut state = shared.state.lock().unwrap();
    loop {
        // Wait out the remainder of the current tick. The deadline
        // advances by whole ticks from the start instant, so callback
        // and dispatch time does not accumulate as drift.
        loop {
            if state.stop_requested {
                state.nodes.clear();
                state.running = false;
                debug!("timer stopped, pending nodes discarded");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (reacquired, _) = shared.wakeup.wait_timeout(state, deadline - now).unwrap();
            state = reacquired;
        }
        deadline += tick;

        state.ticks = state.ticks.wrapping_add(1);
        let due = collect_due(&mut state, shared.tick_ms);

        if !due.is_empty() {
            drop(state);
            for firing in due {
                fire(firing);
            }
            state = shared.state.lock().unwrap();
        }
    }
}

/// Detaches every node whose tick has been reached, re-arming periodic
/// nodes in place so list order is preserved.
fn collect_due(state: &mut TickState, tick_ms: u32) -> Vec<Firing> {
    let now = state.ticks;
    let mut due = Vec::new();

    let mut index = 0;
    while index < state.nodes.len() {
        if !tick_reached(state.nodes[index].fire_tick, now) {
            index += 1;
            continue;
        }

        let firing = {
            let node = &state.nodes[index];
            if let (Some(message), Some(dispatcher)) = (&node.message, &node.dispatcher) {
                Some(Firing::Post {
                    message: Arc::clone(message),
                    dispatcher: Arc::clone(dispatcher),
                })
            } else if let Some(listener) = &node.listener {
                if listener.strong_count() == 0 {
                    // The listener is gone; the node dies with it.
                    None
                } else {
                    Some(Firing::Callback {
                        listener: listener.clone(),
                        cookie: node.cookie,
                    })
                }
            } else {
                None
            }
        };

        let Some(firing) = firing else {
            state.nodes.remove(index);
            continue;
        };
        due.push(firing);

        if state.nodes[index].period_ms != 0 {
            rearm(&mut state.nodes[index], tick_ms);
            index += 1;
        } else {
            state.nodes.remove(index);
        }
    }

    due
}

fn fire(firing: Firing) {
    match firing {
        Firing::Post {
            message,
            dispatcher,
        } => {
            trace!("posting timed message, kind {}", message.kind());
            if let Err(err) = dispatcher.post_message(message) {
                warn!("timed message dropped: {err}");
            }
        }
        Firing::Callback { listener, cookie } => {
            if let Some(listener) = listener.upgrade() {
                listener.on_timeout(cookie);
            }
        }
    }
}

/// Advances a periodic node by one period, folding the sub-tick
/// remainder into the carry and spending it as whole ticks.
fn rearm(node: &mut TimerNode, tick_ms: u32) {
    let mut advance = node.period_ms / tick_ms;
    node.carry_ms += node.period_ms % tick_ms;
    if node.carry_ms >= tick_ms {
        node.carry_ms -= tick_ms;
        advance += 1;
    }
    node.fire_tick = node.fire_tick.wrapping_add(advance);
}

/// Whole ticks covering `delay_ms`, rounded up.
fn ticks_for(delay_ms: u32, tick_ms: u32) -> u32 {
    delay_ms.div_ceil(tick_ms)
}

/// Modular "a is not later than b" on the wrapping tick counter.
fn tick_reached(fire_tick: u32, now: u32) -> bool {
    fire_tick.wrapping_sub(now) as i32 <= 0
}

fn dispatcher_eq(a: &Arc<dyn EventDispatcher>, b: &Arc<dyn EventDispatcher>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
