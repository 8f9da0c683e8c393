//! Priority event scheduler for linkmux.
//!
//! All protocol logic runs as deferred events on one worker thread. Producers
//! (read loops, application calls, timers) only ever [`EventScheduler::schedule`]
//! an event; the [`EventLoop`] pops and executes them one at a time, which is
//! what keeps connection and channel state single-threaded.
//!
//! Ordering rules:
//! - Higher [`Priority`] runs first.
//! - Equal priority runs in insertion order.
//! - An event never runs before the events it depends on. A high-priority
//!   event waiting on a lower-priority one pulls that dependency forward.

pub mod error;
pub mod event_loop;
pub mod pool;
pub mod priority;
pub mod scheduler;

pub use error::{EventError, Result};
pub use event_loop::EventLoop;
pub use pool::{EventPool, PoolPolicy};
pub use priority::Priority;
pub use scheduler::{Action, Event, EventId, EventScheduler, SchedulerConfig, MAX_DEPENDENCIES};
