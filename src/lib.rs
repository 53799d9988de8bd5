//! # Evoke
//!
//! **Evoke** is a small event-dispatch library for long-running Rust
//! processes. It trades futures and executors for a simpler model: a
//! per-thread event loop that reacts to descriptor readiness and to
//! messages posted from other threads, plus a tick-based timer service
//! that feeds those loops.
//!
//! Each [`Selector`] owns one worker thread that waits in `poll(2)` on
//! the registered descriptors and an internal wake pipe. Registered
//! [`SelectorListener`]s receive readiness callbacks on that thread;
//! messages posted through the [`EventDispatcher`] contract are
//! drained on the same thread, FIFO per producer. A [`Timer`] runs an
//! independent tick thread that posts one-shot or periodic messages
//! into any dispatcher, or calls [`TimerListener`]s directly.
//!
//! Evoke offers:
//!
//! - **Synchronous registration**: `add_listener`/`remove_listener`
//!   return only after the worker has absorbed the change
//! - **Message dispatch** keyed by `(kind, receiver)` with directed
//!   and broadcast delivery
//! - **Drift-corrected periodic timers** at a caller-chosen tick
//! - **Scope-keyed log control** over the `log` facade
//!
//! Parallelism comes from instantiating multiple selectors, one per
//! thread of work; there is no shared worker pool.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evoke::{EventDispatcher, Message, ReceiverId, Selector, Timer};
//! use std::sync::Arc;
//!
//! let selector = Arc::new(Selector::new("worker")?);
//!
//! // Deliver kind-7 messages to this receiver on the worker thread.
//! let receiver = ReceiverId::new(1);
//! selector.register_handler(7, receiver, Arc::new(|msg| {
//!     println!("got {:?}", msg);
//! }));
//! selector.post_message(Message::new(7))?;
//!
//! // Post the same kind again in half a second.
//! let timer = Timer::new(10, true)?;
//! timer.send_timed_event(Message::new(7), selector.clone(), 500)?;
//! ```
//!
//! ## Modules
//!
//! - [`logging`]: scope-keyed level and category control
//!
//! The remaining types are re-exported at the crate root.

#[cfg(not(unix))]
compile_error!("evoke is built on poll(2) and pipe(2) and supports Unix targets only");

mod dispatcher;
mod error;
mod events;
mod io;
mod message;
mod selector;
mod sys;
mod timer;

pub mod logging;

pub use dispatcher::{EventDispatcher, Handler};
pub use error::{Error, Result};
pub use events::EventMask;
pub use io::FdReaderWriter;
pub use message::{Message, ReceiverId, INVALID_KIND};
pub use selector::{Selector, SelectorListener, MAX_POLL_FDS};
pub use timer::{Timer, TimerListener};
