//! Poll-based event loop with an owned worker thread.
//!
//! A [`Selector`] replaces hand-written `select`/`poll` loops. It
//! multiplexes two stimulus sources on one dedicated thread:
//!
//! - readiness on registered file descriptors, delivered to
//!   [`SelectorListener`]s,
//! - in-process messages posted through the [`EventDispatcher`]
//!   contract, delivered to handler bindings.
//!
//! Responsibilities:
//! - Register listeners for poll-style event masks
//! - Block waiting for readiness or a wake request
//! - Invoke listeners and drain posted messages on the worker thread
//! - Absorb table mutations synchronously so callers can rely on them

mod wake;

use crate::dispatcher::{EventDispatcher, Handler, HandlerTable};
use crate::error::{Error, Result};
use crate::events::EventMask;
use crate::message::{Message, ReceiverId};
use crate::sys::sys_poll;
use wake::WakeChannel;

use libc::pollfd;
use log::{debug, error, trace, warn};
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle, ThreadId};

/// Capacity of the descriptor set, including the wake channel at slot 0.
pub const MAX_POLL_FDS: usize = 64;

/// Implemented by anything that wants readiness callbacks from a
/// [`Selector`].
pub trait SelectorListener: Send + Sync {
    /// Called on the worker thread when events occur on `fd`.
    ///
    /// The reported set carries the raw bits from the wait and may
    /// include classes the listener did not register for; `ERROR`,
    /// `HANGUP` and `INVALID` are always delivered. `cookie` is the
    /// value given to [`Selector::add_listener`], returned unchanged.
    ///
    /// The callback may add and remove listeners on the same selector;
    /// such changes take effect before the next wait. It must not call
    /// [`Selector::shutdown`].
    fn process_file_events(&self, fd: RawFd, events: EventMask, cookie: usize);
}

/// One registration in the listener table.
struct ListenerEntry {
    fd: RawFd,
    mask: EventMask,
    listener: Weak<dyn SelectorListener>,

    /// Address of the listener allocation, kept for identity checks
    /// that must work even after the listener is gone.
    addr: usize,

    cookie: usize,
}

fn listener_addr(listener: &Arc<dyn SelectorListener>) -> usize {
    Arc::as_ptr(listener).cast::<()>() as usize
}

impl ListenerEntry {
    /// Matches `(fd, listener)` pairs; used by removal and by the
    /// mid-dispatch revalidation scan.
    fn is(&self, fd: RawFd, listener: &Arc<dyn SelectorListener>) -> bool {
        self.fd == fd && self.addr == listener_addr(listener)
    }
}

/// Listener table and loop flags, guarded by one mutex.
struct LoopState {
    listeners: Vec<ListenerEntry>,

    /// The descriptor set no longer reflects the table; rebuild before
    /// the next wait and acknowledge on the condition variable.
    update_fds: bool,

    /// The worker should exit after the current iteration.
    shutdown: bool,

    /// Cleared by the worker on exit so blocked mutators return.
    running: bool,
}

struct Shared {
    state: Mutex<LoopState>,
    absorbed: Condvar,
    queue: Mutex<VecDeque<Arc<Message>>>,
    handlers: Mutex<HandlerTable>,
    wake: WakeChannel,
}

/// A single-threaded event loop multiplexing descriptor readiness and
/// in-process messages.
///
/// Construction starts the worker thread; it runs until
/// [`shutdown`](Selector::shutdown) or drop. A selector owns:
/// - the worker thread,
/// - the listener table,
/// - the wake channel,
/// - the pending-message queue and handler registry of its
///   [`EventDispatcher`] role.
///
/// All public operations are callable from any thread and return
/// synchronously.
pub struct Selector {
    shared: Arc<Shared>,
    worker: ThreadId,
    joiner: Mutex<Option<JoinHandle<()>>>,
}

impl Selector {
    /// Constructs a selector and starts its worker thread.
    ///
    /// `name` becomes the thread name. Fails only if the wake channel
    /// or the thread cannot be created.
    pub fn new(name: &str) -> Result<Selector> {
        let shared = Arc::new(Shared {
            state: Mutex::new(LoopState {
                listeners: Vec::new(),
                update_fds: true,
                shutdown: false,
                running: true,
            }),
            absorbed: Condvar::new(),
            queue: Mutex::new(VecDeque::new()),
            handlers: Mutex::new(HandlerTable::new()),
            wake: WakeChannel::new()?,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker_main(worker_shared))?;

        Ok(Selector {
            worker: handle.thread().id(),
            shared,
            joiner: Mutex::new(Some(handle)),
        })
    }

    /// Registers `listener` for `mask` events on `fd`.
    ///
    /// Returns after the worker has absorbed the change, so readiness
    /// arriving from this point on is guaranteed to reach the
    /// listener. Duplicate `(fd, listener)` registrations are
    /// permitted and each receives events.
    ///
    /// `cookie` is handed back verbatim on every callback; it is wide
    /// enough to smuggle a pointer.
    pub fn add_listener(
        &self,
        fd: RawFd,
        mask: EventMask,
        listener: &Arc<dyn SelectorListener>,
        cookie: usize,
    ) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Err(Error::AlreadyShutDown);
        }

        if !state.listeners.iter().any(|e| e.fd == fd) {
            let mut fds: Vec<RawFd> = state.listeners.iter().map(|e| e.fd).collect();
            fds.sort_unstable();
            fds.dedup();
            // One slot is reserved for the wake channel.
            if fds.len() + 2 > MAX_POLL_FDS {
                return Err(Error::Capacity);
            }
        }

        state.listeners.push(ListenerEntry {
            fd,
            mask,
            listener: Arc::downgrade(listener),
            addr: listener_addr(listener),
            cookie,
        });
        trace!("added listener for fd {fd}, mask {mask:?}");
        self.absorb(state);
        Ok(())
    }

    /// Removes every entry matching `(fd, listener)`.
    ///
    /// From a foreign thread this blocks until the worker has absorbed
    /// the change: once it returns, no further callback for the pair
    /// can occur, except one already executing at the moment of call.
    /// From the worker thread (inside a callback) it returns at once
    /// and takes effect before the next wait. Removing a pair that was
    /// never registered is silent success.
    pub fn remove_listener(&self, fd: RawFd, listener: &Arc<dyn SelectorListener>) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        if state.shutdown {
            return Ok(());
        }

        let before = state.listeners.len();
        state.listeners.retain(|e| !e.is(fd, listener));
        if state.listeners.len() == before {
            return Ok(());
        }

        trace!("removed listener(s) for fd {fd}");
        self.absorb(state);
        Ok(())
    }

    /// Requests worker exit, wakes it and joins it.
    ///
    /// Idempotent; a second call returns without side effects. Calling
    /// from the worker thread itself fails with
    /// [`Error::WrongThread`].
    pub fn shutdown(&self) -> Result<()> {
        if thread::current().id() == self.worker {
            return Err(Error::WrongThread);
        }

        // The joiner lock is held across the join, so a concurrent
        // second call blocks until the worker is really gone.
        let mut joiner = self.joiner.lock().unwrap();
        let Some(handle) = joiner.take() else {
            return Ok(());
        };

        self.shared.state.lock().unwrap().shutdown = true;
        self.shared.wake.wake();
        if handle.join().is_err() {
            error!("selector worker terminated by panic");
        }
        Ok(())
    }

    /// Marks the descriptor set dirty and, from a foreign thread,
    /// wakes the worker and blocks until it acknowledges the rebuild.
    ///
    /// The wake byte is written with the state lock released so a
    /// stalled pipe cannot hold the lock against the worker.
    fn absorb(&self, mut state: MutexGuard<'_, LoopState>) {
        state.update_fds = true;
        if thread::current().id() == self.worker {
            return;
        }
        drop(state);

        self.shared.wake.wake();

        let state = self.shared.state.lock().unwrap();
        drop(
            self.shared
                .absorbed
                .wait_while(state, |s| s.update_fds && s.running)
                .unwrap(),
        );
    }
}

impl EventDispatcher for Selector {
    fn post_message(&self, message: Arc<Message>) -> Result<()> {
        if self.shared.state.lock().unwrap().shutdown {
            return Err(Error::AlreadyShutDown);
        }

        self.shared.queue.lock().unwrap().push_back(message);
        self.shared.wake.wake();
        Ok(())
    }

    fn register_handler(&self, kind: u32, receiver: ReceiverId, handler: Handler) {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .register(kind, receiver, handler);
    }

    fn unregister_handler(&self, kind: u32, receiver: ReceiverId) {
        self.shared.handlers.lock().unwrap().unregister(kind, receiver);
    }

    fn unregister_receiver(&self, receiver: ReceiverId) {
        self.shared
            .handlers
            .lock()
            .unwrap()
            .unregister_receiver(receiver);
    }

    fn owner_thread(&self) -> ThreadId {
        self.worker
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// The worker main loop.
fn worker_main(shared: Arc<Shared>) {
    debug!(
        "selector worker '{}' started",
        thread::current().name().unwrap_or("selector")
    );

    let mut fds: Vec<pollfd> = Vec::with_capacity(MAX_POLL_FDS);
    loop {
        {
            let mut state = shared.state.lock().unwrap();
            if state.update_fds || fds.is_empty() {
                fill_poll_fds(&mut fds, &state.listeners, shared.wake.read_fd());
                state.update_fds = false;
                shared.absorbed.notify_all();
            }
        }

        for pfd in fds.iter_mut() {
            pfd.revents = 0;
        }

        match sys_poll(&mut fds, -1) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!("poll failed, selector worker stopping: {err}");
                break;
            }
        }

        if fds[0].revents != 0 {
            shared.wake.drain();
        }

        for i in 1..fds.len() {
            if fds[i].revents != 0 {
                call_listeners(&shared, fds[i].fd, EventMask::from_poll(fds[i].revents));
            }
        }

        drain_messages(&shared);

        if shared.state.lock().unwrap().shutdown {
            break;
        }
    }

    // Unblock any mutators and release whatever is still queued.
    {
        let mut state = shared.state.lock().unwrap();
        state.shutdown = true;
        state.running = false;
        state.update_fds = false;
        shared.absorbed.notify_all();
    }

    let mut queue = shared.queue.lock().unwrap();
    if !queue.is_empty() {
        warn!("dropping {} undelivered messages on shutdown", queue.len());
        queue.clear();
    }
    debug!("selector worker exiting");
}

/// Rebuilds the compact descriptor array from the listener table.
///
/// The wake channel occupies slot 0. Entries sharing a descriptor are
/// merged by OR-ing their masks; the table is capped before the array
/// can overflow.
fn fill_poll_fds(fds: &mut Vec<pollfd>, listeners: &[ListenerEntry], wake_fd: RawFd) {
    fds.clear();
    fds.push(pollfd {
        fd: wake_fd,
        events: libc::POLLIN,
        revents: 0,
    });

    for entry in listeners {
        if let Some(existing) = fds[1..].iter_mut().find(|p| p.fd == entry.fd) {
            existing.events |= entry.mask.bits();
        } else if fds.len() < MAX_POLL_FDS {
            fds.push(pollfd {
                fd: entry.fd,
                events: entry.mask.bits(),
                revents: 0,
            });
        }
    }
}

/// Invokes every listener registered for `fd` whose mask intersects
/// the reported bits, in registration order.
///
/// Matches are snapshotted under the lock and invoked with it
/// released, so a callback may mutate the table. Each candidate is
/// revalidated right before its invocation: entries removed by an
/// earlier callback in the same pass are skipped.
fn call_listeners(shared: &Arc<Shared>, fd: RawFd, reported: EventMask) {
    let candidates: Vec<(Weak<dyn SelectorListener>, usize, usize)> = {
        let state = shared.state.lock().unwrap();
        state
            .listeners
            .iter()
            .filter(|e| {
                e.fd == fd
                    && (e.mask.intersects(reported)
                        || reported.intersects(EventMask::ALWAYS_REPORTED))
            })
            .map(|e| (e.listener.clone(), e.addr, e.cookie))
            .collect()
    };

    for (weak, addr, cookie) in candidates {
        let still_registered = {
            let state = shared.state.lock().unwrap();
            state.listeners.iter().any(|e| e.fd == fd && e.addr == addr)
        };
        if !still_registered {
            continue;
        }

        if let Some(listener) = weak.upgrade() {
            trace!("events {reported:?} on fd {fd}");
            listener.process_file_events(fd, reported, cookie);
        }
    }
}

/// Pops the pending queue FIFO until empty, invoking the handler
/// bindings for each message.
///
/// Messages posted by a handler land in the same drain pass.
fn drain_messages(shared: &Arc<Shared>) {
    loop {
        let message = shared.queue.lock().unwrap().pop_front();
        let Some(message) = message else {
            return;
        };

        let handlers = shared.handlers.lock().unwrap().matching(&message);
        if handlers.is_empty() {
            trace!("no handler bound for message kind {}", message.kind());
        }
        for handler in handlers {
            handler(&message);
        }
    }
}
